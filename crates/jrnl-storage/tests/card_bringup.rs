use jrnl_storage::{
    CardBackend, CardKind, DeviceHandle, DiskIo, DiskIoAdapter, ErrorKind, HostConfig,
    HostEvent, HostFaults, MemCardHost, NativeSlotConfig, SlotConfig, SpiDeviceConfig,
    StorageBackend, StorageError,
};
use std::sync::Arc;

fn spi_slot() -> SlotConfig {
    SlotConfig::Spi(SpiDeviceConfig::default())
}

fn native_slot() -> SlotConfig {
    SlotConfig::Native(NativeSlotConfig::default())
}

#[test]
fn spi_card_bringup_and_release() {
    let host = MemCardHost::new(2048, 512);
    let probe = host.clone();

    let card = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot()).unwrap();
    assert_eq!(card.info().kind, CardKind::Sdsc);
    assert_eq!(card.info().capacity_bytes(), 2048 * 512);
    assert_eq!(card.volume().sector_count(), 2048);
    assert!(probe.host_initialized());
    assert!(probe.spi_attached());

    drop(card);
    assert!(!probe.host_initialized());
    assert!(!probe.spi_attached());
    assert_eq!(
        probe.events(),
        vec![
            HostEvent::InitHost,
            HostEvent::AttachSpi(0),
            HostEvent::Identify(0),
            HostEvent::DetachSpi(0),
            HostEvent::DeinitHost,
        ]
    );
}

#[test]
fn native_card_uses_configured_slot() {
    let host = MemCardHost::new(64, 512);
    let probe = host.clone();

    let card = CardBackend::acquire(host, &HostConfig::sdmmc(), &native_slot()).unwrap();
    drop(card);
    assert_eq!(
        probe.events(),
        vec![
            HostEvent::InitHost,
            HostEvent::InitSlot(1),
            HostEvent::Identify(1),
            HostEvent::DeinitHost,
        ]
    );
}

#[test]
fn native_slot_on_spi_only_host_is_not_supported() {
    let host = MemCardHost::new(64, 512).spi_only();
    let probe = host.clone();

    let err = CardBackend::acquire(host, &HostConfig::sdmmc(), &native_slot())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert_eq!(probe.events(), vec![HostEvent::InitHost, HostEvent::DeinitHost]);
    assert!(!probe.host_initialized());
}

#[test]
fn already_initialized_host_is_accepted() {
    let host = MemCardHost::new(64, 512).host_already_initialized();
    let probe = host.clone();

    let card = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot()).unwrap();
    assert_eq!(card.info().sector_size, 512);
    drop(card);
    assert_eq!(probe.events()[0], HostEvent::InitHost);
    assert_eq!(probe.events().last(), Some(&HostEvent::DeinitHost));
}

#[test]
fn slot_mode_mismatch_is_rejected_before_touching_host() {
    let host = MemCardHost::new(64, 512);
    let probe = host.clone();

    let err = CardBackend::acquire(host, &HostConfig::sdspi(), &native_slot())
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
    assert!(probe.events().is_empty());
}

#[test]
fn identify_failure_tears_down_everything() {
    let host = MemCardHost::new(64, 512);
    let probe = host.clone();
    let injected = StorageError::Driver {
        driver: "sdmmc",
        code: 0x107,
    };
    probe.set_faults(HostFaults {
        identify: Some(injected.clone()),
        ..HostFaults::default()
    });

    let err = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot())
        .err()
        .unwrap();
    assert_eq!(err, injected);
    assert!(!probe.spi_attached());
    assert!(!probe.host_initialized());
}

#[test]
fn host_init_failure_leaves_nothing_to_undo() {
    let host = MemCardHost::new(64, 512);
    let probe = host.clone();
    probe.set_faults(HostFaults {
        init_host: Some(StorageError::Driver {
            driver: "sdmmc",
            code: 0x103,
        }),
        ..HostFaults::default()
    });

    let err = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Collaborator(0x103));
    assert_eq!(probe.events(), vec![HostEvent::InitHost]);
}

#[test]
fn zero_sector_card_is_not_supported() {
    let host = MemCardHost::new(64, 0);
    let sim = host.clone();

    let err = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot())
        .err()
        .unwrap();
    assert_eq!(err, StorageError::NotSupported("card sector size"));
    assert!(!sim.spi_attached());
    assert!(!sim.host_initialized());
}

#[test]
fn oversized_card_geometry_does_not_overflow() {
    let host = MemCardHost::new(u64::MAX, 512);
    let err = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot())
        .err()
        .unwrap();
    assert_eq!(err, StorageError::NotSupported("card reports zero capacity"));
}

#[test]
fn probing_frequency_is_the_floor() {
    let host = MemCardHost::new(64, 512);
    let config = HostConfig {
        max_freq_khz: 100,
        ..HostConfig::sdspi()
    };
    let err = CardBackend::acquire(host, &config, &spi_slot()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn disk_io_reaches_card_media() {
    let host = MemCardHost::new(64, 512);
    let probe = host.clone();
    let card = CardBackend::acquire(host, &HostConfig::sdspi(), &spi_slot()).unwrap();
    let device = Arc::new(DeviceHandle::new(card));
    let io = DiskIoAdapter::new(device.clone());

    io.write(1024, &[0xA5u8; 512]).unwrap();
    let mut buf = vec![0u8; 1024];
    io.read(512, &mut buf).unwrap();
    assert!(buf[..512].iter().all(|&b| b == 0));
    assert!(buf[512..].iter().all(|&b| b == 0xA5));
    assert_eq!(probe.media(1024, 4), vec![0xA5; 4]);

    let err = io.read(64 * 512, &mut [0u8; 512]).unwrap_err();
    assert!(matches!(err, StorageError::OutOfBounds { .. }));

    assert!(device.release());
    assert!(!probe.host_initialized());
    assert!(matches!(
        io.write(0, &[0u8; 512]).unwrap_err(),
        StorageError::InvalidState(_)
    ));
}
