//! 端到端场景：仿真设备上的完整会话
//!
//! 覆盖从固件识别、系统使能、电机配置到移动规划与完成等待的全链路，
//! 以及两个电机并发移动时的组合等待。

use std::time::Duration;

use gantry_client::{ConfigUpdate, MotorBuilder, Rate};
use gantry_driver::mock::{MOCK_IDENTITY, MockLink};
use gantry_driver::{Driver, DriverConfig, wait_all};

fn fast_driver(link: &MockLink) -> Driver {
    Driver::with_config(
        Box::new(link.clone()),
        DriverConfig {
            retry_interval: Duration::from_millis(30),
            ..DriverConfig::default()
        },
    )
}

#[test]
fn full_session_round_trip() {
    let link = MockLink::new();
    let driver = fast_driver(&link);

    assert_eq!(driver.firmware_info().unwrap(), MOCK_IDENTITY);

    let _system = driver.enable().unwrap();
    assert!(link.sys_enabled());

    let mut motor = MotorBuilder::new(0)
        .scale(6.0 / 360.0)
        .invert(true)
        .microsteps(16)
        .stall_sensitivity(10)
        .rms_current(2000)
        .initial_position(0.0)
        .attach(&driver)
        .unwrap();

    // 配置往返无错即成功
    motor
        .configure(ConfigUpdate {
            stall_sensitivity: Some(12),
            ..ConfigUpdate::default()
        })
        .unwrap();
    assert_eq!(link.motor_config(0).unwrap().stall_sensitivity, 12);

    {
        let mut enabled = motor.enable().unwrap();
        assert!(link.motor_enabled(0));

        let expectation = enabled.move_to(90.0, Rate::UnitsPerSec(20.0)).unwrap();
        let sent = link.last_command(0).unwrap();
        assert_eq!(sent.target, 4800);
        assert_eq!(sent.step_interval_us, 938);

        expectation.wait(Some(Duration::from_secs(1))).unwrap();
        let position = enabled.position().unwrap();
        assert!((position - 90.0).abs() < 1e-9);

        let status = enabled.status().unwrap();
        assert_eq!(status.position, 4800);
    }
    // 守卫退出后电机已去使能
    assert!(!link.motor_enabled(0));
}

#[test]
fn concurrent_moves_wait_all() {
    let link = MockLink::new();
    let driver = fast_driver(&link);
    let _system = driver.enable().unwrap();

    let mut first = MotorBuilder::new(0)
        .scale(6.0 / 360.0)
        .microsteps(16)
        .initial_position(0.0)
        .attach(&driver)
        .unwrap();
    let mut second = MotorBuilder::new(1)
        .scale(6.0 / 360.0)
        .microsteps(16)
        .initial_position(0.0)
        .attach(&driver)
        .unwrap();

    let mut first = first.enable().unwrap();
    let mut second = second.enable().unwrap();

    let expectations = vec![
        first.move_to(30.0, Rate::UnitsPerSec(20.0)).unwrap(),
        second.move_to(-30.0, Rate::Seconds(1.5)).unwrap(),
        // 第三个条件没有未决工作
        gantry_driver::Expectation::fulfilled(),
    ];
    let mut ticks = 0u32;
    let mut tick = || {
        ticks += 1;
        std::thread::sleep(Duration::from_millis(1));
    };
    wait_all(expectations, Some(Duration::from_secs(1)), Some(&mut tick)).unwrap();

    assert!((first.position().unwrap() - 30.0).abs() < 1e-9);
    assert!((second.position().unwrap() + 30.0).abs() < 1e-9);
    assert_eq!(link.last_command(1).unwrap().target, -1600);
}

#[test]
fn session_shutdown_terminates_waiters() {
    let link = MockLink::new();
    let driver = fast_driver(&link);
    let mut motor = MotorBuilder::new(0)
        .scale(6.0 / 360.0)
        .microsteps(16)
        .attach(&driver)
        .unwrap();
    // 未使能电机的移动会被设备拒绝，期望保持未决
    let expectation = motor.move_to(1.0, Rate::Seconds(1.0)).unwrap();
    drop(motor);
    drop(driver);
    let err = expectation.wait(None).unwrap_err();
    assert!(matches!(err, gantry_driver::DriverError::StreamTerminated));
}
