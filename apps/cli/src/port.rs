//! 串口打开与 USB 定位
//!
//! 核心层只依赖 [`SerialLink`]；这里把 `serialport` 包装成非阻塞读的
//! 链路实现，并提供按 USB VID/PID 定位端口的便利函数。

use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gantry_driver::SerialLink;

/// 控制器的默认 USB 标识
pub const DEFAULT_VID: u16 = 0x2341;
pub const DEFAULT_PID: u16 = 0x0070;

struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SerialPortLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // 以短超时模拟非阻塞读：超时即「暂无数据」
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// 枚举串口，按 USB VID/PID 定位设备
pub fn locate(vid: u16, pid: u16) -> Option<String> {
    serialport::available_ports()
        .ok()?
        .into_iter()
        .find_map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) if usb.vid == vid && usb.pid == pid => {
                Some(port.port_name)
            }
            _ => None,
        })
}

/// 打开链路：显式端口优先，否则按默认 VID/PID 搜索
pub fn open(port: Option<&str>, baud: u32) -> Result<Box<dyn SerialLink>> {
    let name = match port {
        Some(name) => name.to_owned(),
        None => match locate(DEFAULT_VID, DEFAULT_PID) {
            Some(name) => name,
            None => bail!(
                "serial device {DEFAULT_VID:04X}:{DEFAULT_PID:04X} not found, specify --port"
            ),
        },
    };
    tracing::info!("opening serial device at {name} ({baud} baud)");
    let port = serialport::new(&name, baud)
        .timeout(Duration::from_millis(1))
        .open()
        .with_context(|| format!("failed to open serial port {name}"))?;
    Ok(Box::new(SerialPortLink { port }))
}
