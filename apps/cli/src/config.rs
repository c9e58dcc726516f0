//! CLI 配置文件
//!
//! `<config_dir>/gantry/config.toml`，保存默认端口与波特率。
//! 命令行参数优先于配置文件。

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// 默认串口（不设则按 VID/PID 搜索）
    pub port: Option<String>,
    /// 默认波特率
    pub baud: Option<u32>,
}

fn config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("cannot determine config directory")?;
    path.push("gantry");
    fs::create_dir_all(&path).context("failed to create config directory")?;
    path.push("config.toml");
    Ok(path)
}

impl CliConfig {
    pub fn load() -> Result<Self> {
        let path = config_file()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        toml::from_str(&content).context("failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = config_file()?;
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, content).context("failed to write config file")?;
        Ok(())
    }
}
