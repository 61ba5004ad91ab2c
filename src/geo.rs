use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A longitude/latitude pair, serialized the GeoJSON way as `[lng, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(pair: [f64; 2]) -> Self {
        LngLat {
            lng: pair[0],
            lat: pair[1],
        }
    }
}

impl From<LngLat> for [f64; 2] {
    fn from(point: LngLat) -> Self {
        [point.lng, point.lat]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south_west: LngLat,
    pub north_east: LngLat,
}

impl Bounds {
    pub fn around(point: LngLat) -> Self {
        Bounds {
            south_west: point,
            north_east: point,
        }
    }

    pub fn extend(mut self, point: LngLat) -> Self {
        self.south_west.lng = self.south_west.lng.min(point.lng);
        self.south_west.lat = self.south_west.lat.min(point.lat);
        self.north_east.lng = self.north_east.lng.max(point.lng);
        self.north_east.lat = self.north_east.lat.max(point.lat);
        self
    }

    pub fn contains(&self, point: LngLat) -> bool {
        point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
            && point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
    }
}

/// GeoJSON `LineString` geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "LineString")]
pub struct LineString {
    pub coordinates: Vec<LngLat>,
}

impl LineString {
    pub fn straight(origin: LngLat, destination: LngLat) -> Self {
        LineString {
            coordinates: vec![origin, destination],
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.coordinates.len() >= 2
    }
}

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

/// Great-circle distance in kilometers (haversine).
pub fn distance_km(from: LngLat, to: LngLat) -> f64 {
    let d_lat = to_radians(to.lat - from.lat);
    let d_lng = to_radians(to.lng - from.lng);
    let lat1 = to_radians(from.lat);
    let lat2 = to_radians(to.lat);

    let a = (d_lat / 2.0).sin().powi(2) + (d_lng / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn distance_m(from: LngLat, to: LngLat) -> f64 {
    distance_km(from, to) * 1000.0
}

pub fn format_distance(distance_km: f64) -> String {
    if distance_km >= 1.0 {
        return format!("{:.2}km", distance_km);
    }
    format!("{}m", (distance_km * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_seoul_city_hall_to_gwanghwamun() {
        let city_hall = LngLat::new(126.9780, 37.5665);
        let gwanghwamun = LngLat::new(126.9769, 37.5759);
        let km = distance_km(city_hall, gwanghwamun);
        assert!(km > 1.0 && km < 1.1, "got {}", km);
        assert_eq!(distance_km(city_hall, city_hall), 0.0);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(1.234), "1.23km");
        assert_eq!(format_distance(1.0), "1.00km");
        assert_eq!(format_distance(0.8504), "850m");
        assert_eq!(format_distance(0.0), "0m");
    }

    #[test]
    fn test_bounds_extend() {
        let bounds = Bounds::around(LngLat::new(127.0, 37.5)).extend(LngLat::new(126.9, 37.6));
        assert_eq!(bounds.south_west, LngLat::new(126.9, 37.5));
        assert_eq!(bounds.north_east, LngLat::new(127.0, 37.6));
        assert!(bounds.contains(LngLat::new(126.95, 37.55)));
    }

    #[test]
    fn test_line_string_geojson_shape() {
        let line = LineString::straight(LngLat::new(126.978, 37.5665), LngLat::new(126.98, 37.57));
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["type"], "LineString");
        assert_eq!(json["coordinates"][0][0], 126.978);
        assert_eq!(json["coordinates"][1][1], 37.57);

        let back: LineString = serde_json::from_value(json).unwrap();
        assert_eq!(back, line);
    }
}
