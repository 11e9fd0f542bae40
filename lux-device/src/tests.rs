//! Integration tests for lux-device

use std::time::{Duration, Instant};

use crate::*;

fn ready_port(bus: &MockFtdiBus) -> FtdiProvider<MockFtdiBus> {
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();
    port.open().unwrap();
    bus.clear_calls();
    port
}

fn single_device_bus() -> MockFtdiBus {
    MockFtdiBus::with_devices(vec![MockFtdiBus::device(0x0403, 0x6014, "FT01")])
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDSHAKE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_open_handshake_sequence() {
    let bus = single_device_bus();
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();
    port.open().unwrap();

    assert_eq!(
        bus.calls(),
        vec![
            BusCall::FindAll,
            BusCall::OpenDevice(0),
            BusCall::DisableBitbang,
            BusCall::SetFlowControl(0),
            BusCall::SetBitmode { mask: 0x00, mode: 0x00 },
            BusCall::SetBitmode { mask: 0xff, mode: 0x02 },
            BusCall::Write(vec![0x8a, 0x86, 29, 0, 0x80, 0x08, 0x0b]),
        ]
    );
    assert_eq!(port.state(), PortState::Ready);
    assert!(port.last_error().is_none());
}

#[test]
fn test_open_by_serial_string() {
    let bus = single_device_bus();
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    let config = DeviceConfig {
        output: "s:0x0403:0x6014:FT01".into(),
        ..Default::default()
    };
    port.init(&config).unwrap();
    port.open().unwrap();

    assert_eq!(bus.calls()[0], BusCall::OpenString("s:0x0403:0x6014:FT01".into()));
    assert!(port.is_ready());
}

#[test]
fn test_open_twice_is_noop() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    port.open().unwrap();
    assert!(bus.calls().is_empty());
}

#[test]
fn test_auto_without_devices() {
    let bus = MockFtdiBus::new();
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();

    let err = port.open().unwrap_err();
    assert!(matches!(err, DeviceError::NoDevice(_)));
    assert_eq!(port.state(), PortState::Error);
    assert_eq!(port.last_error(), Some("No ftdi devices detected"));
    assert!(!bus.is_open());
}

#[test]
fn test_unknown_open_string() {
    let bus = single_device_bus();
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    let config = DeviceConfig {
        output: "s:0x0403:0x6014:MISSING".into(),
        ..Default::default()
    };
    port.init(&config).unwrap();

    assert!(matches!(port.open(), Err(DeviceError::Hardware(_))));
    assert_eq!(port.state(), PortState::Error);
    assert_eq!(port.last_error(), Some("device not found"));
}

#[test]
fn test_handshake_failure_releases_handle() {
    let bus = single_device_bus();
    bus.fail_next(BusOp::SetFlowControl, "control transfer failed");
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();

    assert!(port.open().is_err());
    assert_eq!(port.state(), PortState::Error);
    assert_eq!(port.last_error(), Some("control transfer failed"));
    assert!(!bus.is_open());
    assert_eq!(bus.calls().last(), Some(&BusCall::UsbClose));
}

#[test]
fn test_setup_short_write() {
    let bus = single_device_bus();
    bus.short_write_after(0);
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();

    let err = port.open().unwrap_err();
    assert!(matches!(err, DeviceError::ShortWrite { stage: WriteStage::Setup, expected: 7, written: 6, .. }));
    assert_eq!(port.state(), PortState::Error);
}

// ═══════════════════════════════════════════════════════════════════════════
// FRAMES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_frame_layout() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);

    let frame = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
    port.write(&frame).unwrap();

    assert_eq!(
        bus.writes(),
        vec![
            vec![0x80, 0x00, 0x0b, 0x11, 8, 0],
            frame.to_vec(),
            vec![0x80, 0x08, 0x0b],
        ]
    );
    assert_eq!(port.state(), PortState::Ready);
}

#[test]
fn test_empty_frame_writes_nothing() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    port.write(&[]).unwrap();
    assert!(bus.writes().is_empty());
}

#[test]
fn test_write_colors_flattens_rgb() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    port.write_colors(&[RGB8::new(10, 20, 30), RGB8::new(40, 50, 60)]).unwrap();
    assert_eq!(bus.writes()[1], vec![10, 20, 30, 40, 50, 60]);
}

#[test]
fn test_oversized_frame_keeps_port_ready() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    let frame = vec![0u8; mpsse::MAX_PAYLOAD_LEN + 1];

    assert!(matches!(port.write(&frame), Err(DeviceError::InvalidConfig(_))));
    assert_eq!(port.state(), PortState::Ready);
    assert!(bus.writes().is_empty());
}

#[test]
fn test_write_requires_ready() {
    let mut port = FtdiProvider::new(single_device_bus());
    assert!(matches!(port.write(&[1]), Err(DeviceError::InvalidState(_))));
}

#[test]
fn test_short_write_each_stage_enters_error() {
    let stages = [WriteStage::Header, WriteStage::Payload, WriteStage::Trailer];

    for (skip, expected_stage) in stages.into_iter().enumerate() {
        let bus = single_device_bus();
        let mut port = ready_port(&bus);
        bus.short_write_after(skip);

        match port.write(&[1, 2, 3]) {
            Err(DeviceError::ShortWrite { stage, message, .. }) => {
                assert_eq!(stage, expected_stage);
                assert_eq!(message, "usb bulk write timed out");
            }
            other => panic!("expected short write at {}, got {:?}", expected_stage, other),
        }

        assert_eq!(port.state(), PortState::Error);
        assert_eq!(port.last_error(), Some("usb bulk write timed out"));
        assert!(!bus.is_open());
        // Nenhuma escrita depois da etapa que falhou
        assert_eq!(bus.writes().len(), skip + 1);
    }
}

#[test]
fn test_error_recovery_requires_close() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    bus.fail_next(BusOp::WriteData, "LIBUSB_ERROR_NO_DEVICE");

    assert!(matches!(port.write(&[1, 2, 3]), Err(DeviceError::Hardware(_))));
    assert_eq!(port.state(), PortState::Error);

    // Error -> Ready é proibido
    assert!(matches!(port.write(&[1]), Err(DeviceError::InvalidState(_))));
    assert!(matches!(port.open(), Err(DeviceError::InvalidState(_))));

    port.close();
    assert_eq!(port.state(), PortState::Closed);

    port.open().unwrap();
    port.write(&[1, 2, 3]).unwrap();
    assert_eq!(port.state(), PortState::Ready);
}

// ═══════════════════════════════════════════════════════════════════════════
// CLOSE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_close_from_ready() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    port.close();

    assert_eq!(
        bus.calls(),
        vec![BusCall::SetBitmode { mask: 0x00, mode: 0x00 }, BusCall::UsbClose]
    );
    assert_eq!(port.state(), PortState::Closed);
}

#[test]
fn test_close_always_attempts_reset() {
    let bus = single_device_bus();
    let mut port = FtdiProvider::new(bus.clone());
    port.close();
    assert_eq!(bus.calls(), vec![BusCall::SetBitmode { mask: 0x00, mode: 0x00 }]);

    let mut port = ready_port(&bus);
    bus.fail_next(BusOp::WriteData, "pipe");
    let _ = port.write(&[1]);
    bus.clear_calls();

    port.close();
    assert_eq!(bus.calls(), vec![BusCall::SetBitmode { mask: 0x00, mode: 0x00 }]);
    assert_eq!(port.state(), PortState::Closed);
}

#[test]
fn test_close_tolerates_reset_failure() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    bus.fail_next(BusOp::SetBitmode, "device gone");
    port.close();
    assert_eq!(port.state(), PortState::Closed);
    assert!(!bus.is_open());
}

#[test]
fn test_close_delay_only_when_ready() {
    let bus = single_device_bus();
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::from_millis(20));
    port.init(&DeviceConfig::default()).unwrap();
    port.open().unwrap();

    let started = Instant::now();
    port.close();
    assert!(started.elapsed() >= Duration::from_millis(20));

    let started = Instant::now();
    port.close();
    assert!(started.elapsed() < Duration::from_millis(20));
}

#[test]
fn test_reconfigure_requires_closed_port() {
    let bus = single_device_bus();
    let mut port = ready_port(&bus);
    assert!(matches!(port.init(&DeviceConfig::default()), Err(DeviceError::InvalidState(_))));

    port.close();
    let config = DeviceConfig {
        rate: 2_000_000,
        ..Default::default()
    };
    port.init(&config).unwrap();
    assert_eq!(port.divisor(), 14);
}

// ═══════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_discovery_lists_auto_first() {
    let bus = MockFtdiBus::with_devices(vec![
        MockFtdiBus::device(0x0403, 0x6014, "FT01"),
        MockFtdiBus::device(0x0403, 0x6014, ""),
    ]);
    let mut port = FtdiProvider::new(bus.clone());

    let result = port.discover(&serde_json::Value::Null);
    assert_eq!(result.led_device_type, "ftdi");
    assert_eq!(result.devices[0].value, "auto");
    assert_eq!(result.devices[1].value, "s:0x0403:0x6014:FT01");
    assert_eq!(result.devices[2].value, "i:0x0403:0x6014:0");
    assert_eq!(result.devices[2].name, "i:0x0403:0x6014:0 (FTDI)");

    // Descoberta não deixa handle aberto
    assert!(!bus.is_open());
    assert_eq!(port.state(), PortState::Closed);
}

#[test]
fn test_discovery_is_stable() {
    let bus = MockFtdiBus::with_devices(vec![
        MockFtdiBus::device(0x0403, 0x6010, ""),
        MockFtdiBus::device(0x0403, 0x6010, ""),
    ]);
    let mut port = FtdiProvider::new(bus);
    let first = port.discover(&serde_json::Value::Null);
    let second = port.discover(&serde_json::Value::Null);
    assert_eq!(first, second);
}

#[test]
fn test_discovery_enumeration_failure() {
    let bus = single_device_bus();
    bus.fail_next(BusOp::FindAll, "libusb init failed");
    let mut port = FtdiProvider::new(bus);
    let result = port.discover(&serde_json::Value::Null);
    assert_eq!(result.devices.len(), 1);
    assert_eq!(result.devices[0].value, AUTO_SETTING);
}
