//! # Gantry CLI
//!
//! 龙门控制器命令行工具。
//!
//! ```bash
//! # 配置默认端口
//! gantry-cli config set --port /dev/ttyACM0
//!
//! # 固件识别
//! gantry-cli info
//!
//! # 单次移动（内部：使能 -> 移动 -> 等待完成 -> 去使能）
//! gantry-cli move --id 0 --target 90 --speed 20 --scale 0.016667
//!
//! # 报文监视 / 交互模式
//! gantry-cli monitor
//! gantry-cli shell --scale 0.016667
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use gantry_client::{MotorBuilder, Rate};
use gantry_driver::{Driver, ReplySpec};
use gantry_protocol::{Method, MotorStatus, Property, peek_motor_id};

mod config;
mod port;
mod shell;

use config::CliConfig;

/// Gantry CLI - 龙门控制器命令行工具
#[derive(Parser, Debug)]
#[command(name = "gantry-cli")]
#[command(about = "Command-line interface for the gantry stepper controller", long_about = None)]
#[command(version)]
struct Cli {
    /// 串口路径（默认读配置文件或按 USB VID/PID 搜索）
    #[arg(short, long)]
    port: Option<String>,

    /// 波特率
    #[arg(short = 'B', long)]
    baud: Option<u32>,

    /// 提升日志级别（-v 调试，-vv 跟踪）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 打印固件标识
    Info,

    /// 打印收到的每一个报文，直到 Ctrl-C
    Monitor,

    /// 单次移动并等待完成
    Move {
        /// 电机 id
        #[arg(long, default_value_t = 0)]
        id: u8,

        /// 目标位置（单位制）
        #[arg(long, allow_hyphen_values = true)]
        target: f64,

        /// 运动速度（单位每秒），与 --duration 二选一
        #[arg(long, conflicts_with = "duration")]
        speed: Option<f64>,

        /// 运动总时长（秒）
        #[arg(long)]
        duration: Option<f64>,

        /// 单位换算系数（1.0 = 每单位一整圈）
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
    },

    /// 查询电机诊断状态
    Status {
        #[arg(long, default_value_t = 0)]
        id: u8,
    },

    /// 交互模式
    Shell {
        /// 单位换算系数
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// 写入默认端口 / 波特率
    Set {
        #[arg(long)]
        port: Option<String>,

        #[arg(long)]
        baud: Option<u32>,
    },

    /// 打印当前配置
    Get,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "gantry={level},gantry_protocol={level},gantry_driver={level},gantry_client={level},gantry_cli={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // 配置子命令不需要打开设备
    if let Commands::Config(command) = &cli.command {
        return run_config(command);
    }

    let file = CliConfig::load().unwrap_or_default();
    let port = cli.port.clone().or(file.port);
    let baud = cli.baud.or(file.baud).unwrap_or(115_200);
    let link = port::open(port.as_deref(), baud)?;
    let driver = Driver::new(link);

    match cli.command {
        Commands::Info => {
            println!("{}", driver.firmware_info()?);
        }

        Commands::Monitor => {
            info!("device: {}", driver.firmware_info()?);
            run_monitor(&driver)?;
        }

        Commands::Move {
            id,
            target,
            speed,
            duration,
            scale,
        } => {
            let rate = match (speed, duration) {
                (Some(speed), None) => Rate::UnitsPerSec(speed),
                (None, Some(seconds)) => Rate::Seconds(seconds),
                _ => bail!("specify either --speed or --duration"),
            };
            let _system = driver.enable()?;
            let mut motor = MotorBuilder::new(id).scale(scale).attach(&driver)?;
            let mut motor = motor.enable()?;
            let expectation = motor.move_to(target, rate)?;
            info!("move issued, waiting for completion");
            expectation.wait(None)?;
            println!("motor {id} at {:.3}", motor.position()?);
        }

        Commands::Status { id } => {
            let status = query_status(&driver, id)?;
            println!(
                "motor {}: diag={} stall_guard={} position={} steps",
                status.id, status.diag_pin, status.stall_guard, status.position
            );
        }

        Commands::Shell { scale } => {
            info!("device: {}", driver.firmware_info()?);
            shell::run_shell(&driver, scale)?;
        }

        Commands::Config(_) => unreachable!("handled above"),
    }
    Ok(())
}

fn run_config(command: &ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Set { port, baud } => {
            let mut config = CliConfig::load().unwrap_or_default();
            if let Some(port) = port {
                config.port = Some(port.clone());
            }
            if let Some(baud) = baud {
                config.baud = Some(*baud);
            }
            config.save()?;
            println!("configuration saved");
        }
        ConfigCommand::Get => {
            let config = CliConfig::load()?;
            println!("port = {}", config.port.as_deref().unwrap_or("(auto)"));
            match config.baud {
                Some(baud) => println!("baud = {baud}"),
                None => println!("baud = (default 115200)"),
            }
        }
    }
    Ok(())
}

/// 报文监视：独立游标不干扰任何其他等待者
fn run_monitor(driver: &Driver) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }
    let mut cursor = driver.cursor();
    while !stop.load(Ordering::SeqCst) {
        match cursor.poll() {
            Ok(Some(packet)) => println!("{packet}"),
            Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            Err(_) => break,
        }
    }
    Ok(())
}

/// 不经过电机对象的只读状态查询，避免覆盖设备上的现有配置
fn query_status(driver: &Driver, id: u8) -> Result<MotorStatus> {
    let payload = driver.send_request(
        Method::Get,
        Property::MotStat,
        &[id],
        Some(ReplySpec::matching(
            Method::Ack,
            Property::MotStat,
            move |payload| Ok(peek_motor_id(payload)? == id),
        )),
    )?;
    Ok(MotorStatus::decode(&payload)?)
}
