//! 交互模式
//!
//! 行导向的两轴联动调试循环：
//!
//! ```text
//! move <x> <y>    移动两轴到目标位置
//! speed <x> <y>   更新速度并按新速度重新下发当前目标
//! status          打印两轴诊断快照
//! help            帮助
//! exit            退出（使能守卫随作用域回收）
//! ```

use std::io::{self, BufRead};

use anyhow::Result;
use gantry_client::{MotorBuilder, Rate};
use gantry_driver::Driver;

pub fn run_shell(driver: &Driver, scale: f64) -> Result<()> {
    let _system = driver.enable()?;
    let mut m0 = MotorBuilder::new(0).scale(scale).attach(driver)?;
    let mut m1 = MotorBuilder::new(1).scale(scale).attach(driver)?;
    let mut m0 = m0.enable()?;
    let mut m1 = m1.enable()?;

    // 目标与速度是会话状态：speed 命令按新速度重新下发当前目标
    let mut t0 = m0.get_position()?;
    let mut t1 = m1.get_position()?;
    let (mut s0, mut s1) = (20.0f64, 20.0f64);

    eprintln!("gantry> type 'help' for commands");
    for line in io::stdin().lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = parts.first() else {
            continue;
        };
        match (command, parts.len()) {
            ("exit" | "quit", _) => break,
            ("move", 3) => match (parts[1].parse::<f64>(), parts[2].parse::<f64>()) {
                (Ok(x), Ok(y)) => {
                    (t0, t1) = (x, y);
                    if let Err(err) = m0
                        .move_to(t0, Rate::UnitsPerSec(s0))
                        .and(m1.move_to(t1, Rate::UnitsPerSec(s1)))
                    {
                        eprintln!("error: {err}");
                    }
                }
                _ => eprintln!("error: invalid position values"),
            },
            ("speed", 3) => match (parts[1].parse::<f64>(), parts[2].parse::<f64>()) {
                (Ok(x), Ok(y)) => {
                    (s0, s1) = (x, y);
                    if let Err(err) = m0
                        .move_to(t0, Rate::UnitsPerSec(s0))
                        .and(m1.move_to(t1, Rate::UnitsPerSec(s1)))
                    {
                        eprintln!("error: {err}");
                    }
                }
                _ => eprintln!("error: invalid speed values"),
            },
            ("status", _) => {
                for motor in [&m0, &m1] {
                    match motor.status() {
                        Ok(status) => println!(
                            "motor {}: diag={} stall_guard={} position={} steps",
                            status.id, status.diag_pin, status.stall_guard, status.position
                        ),
                        Err(err) => eprintln!("error: {err}"),
                    }
                }
            }
            _ => {
                if !matches!(command, "help") {
                    eprintln!("unknown command: {line}");
                }
                eprintln!("available commands:");
                eprintln!("  help           show this help message");
                eprintln!("  move <x> <y>   move motors to positions");
                eprintln!("  speed <x> <y>  set motor speeds");
                eprintln!("  status         print motor diagnostics");
                eprintln!("  exit           leave the shell");
            }
        }
    }
    Ok(())
}
