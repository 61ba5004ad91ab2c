use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::map::engine::{DEFAULT_STYLE, EngineOptions};
use crate::model::{DEFAULT_LATITUDE, DEFAULT_LONGITUDE, Location};

#[derive(Parser, Debug)]
#[command(name = "wifimap")]
#[command(about = "Runs the wifimap service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wifimap")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: i32,
    #[serde(default = "default_radius")]
    pub default_radius: u32,
    #[serde(default = "default_latitude")]
    pub default_latitude: f64,
    #[serde(default = "default_longitude")]
    pub default_longitude: f64,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_radius() -> u32 {
    1000
}

fn default_latitude() -> f64 {
    DEFAULT_LATITUDE
}

fn default_longitude() -> f64 {
    DEFAULT_LONGITUDE
}

fn default_sync_interval() -> u64 {
    60
}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

fn default_language() -> String {
    "ko".to_string()
}

impl App {
    pub fn get_db(&self) -> &str {
        return &self.database;
    }

    pub fn get_port(&self) -> i32 {
        return self.port;
    }

    pub fn default_location(&self) -> Location {
        Location::new(self.default_latitude, self.default_longitude)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapSettings {
    pub access_token: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub directions_url: Option<String>,
}

impl MapSettings {
    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::new(self.access_token.clone());
        options.style = self.style.clone();
        options.language = self.language.clone();
        options
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WifiSettings {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: App,
    pub map: MapSettings,
    pub wifi: WifiSettings,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
