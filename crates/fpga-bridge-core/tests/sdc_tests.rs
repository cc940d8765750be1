//! Virtual drive mounting, sector translation and the SD request path.

mod common;

use std::thread;

use common::{cluster_sector, make_bridge, FsError, MockPort, CLUSTER_BYTES};
use fpga_bridge_core::protocol::{SdcCommand, SdcStatus, Target, SDC_MCU_READ, SDC_STATUS};
use fpga_bridge_core::sdc::{ClusterMap, ClusterRun};
use fpga_bridge_core::{BridgeConfig, BridgeError};

fn sdc_commands(port: &MockPort) -> Vec<SdcCommand> {
    port.frames(Target::Sdc)
        .iter()
        .map(|f| SdcCommand::decode(f[0], &f[1..]).expect("valid SDC frame"))
        .collect()
}

fn request(port: &MockPort, drive: u8, sector: u32) {
    let status = SdcStatus {
        card: 0x20,
        request: 1 << drive,
        sector,
    };
    let mut miso = vec![0, 0];
    miso.extend_from_slice(&status.to_bytes());
    port.reply(Target::Sdc, SDC_STATUS, &miso);
}

// ============================================================================
// Mounting
// ============================================================================

mod mount_tests {
    use super::*;

    #[test]
    fn open_reports_size_to_core() {
        let (bridge, port) = make_bridge(BridgeConfig::default());

        let size = bridge.open_image(0, Some("DISK_A.ST")).expect("image opens");
        assert_eq!(size, 3 * CLUSTER_BYTES);
        assert_eq!(
            sdc_commands(&port),
            vec![SdcCommand::Inserted {
                drive: 0,
                size: 3 * CLUSTER_BYTES
            }]
        );

        let drives = bridge.drives();
        assert_eq!(drives.image_name(0), Some("DISK_A.ST"));
        assert!(drives.is_open(0));
        assert!(!drives.is_open(1));
    }

    #[test]
    fn replacing_an_image_reports_removal_first() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        bridge.open_image(1, Some("DISK_A.ST")).unwrap();
        port.clear();

        bridge.open_image(1, Some("/GAMES/DISK_B.ST")).unwrap();
        assert_eq!(
            sdc_commands(&port),
            vec![
                SdcCommand::Inserted { drive: 1, size: 0 },
                SdcCommand::Inserted {
                    drive: 1,
                    size: 4 * CLUSTER_BYTES
                },
            ]
        );
        assert_eq!(bridge.drives().cwd(1), Some("/GAMES"));
    }

    #[test]
    fn eject_notifies_zero_size() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        port.clear();

        assert_eq!(bridge.open_image(0, None).unwrap(), 0);
        assert_eq!(
            sdc_commands(&port),
            vec![SdcCommand::Inserted { drive: 0, size: 0 }]
        );
        assert!(!bridge.drives().is_open(0));
        assert_eq!(bridge.translate(0, 0).unwrap(), None);
    }

    #[test]
    fn failed_open_leaves_drive_ejected() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        port.clear();

        let err = bridge.open_image(0, Some("MISSING.ST")).unwrap_err();
        assert!(matches!(err, BridgeError::Filesystem(FsError::NotFound)));
        assert!(!bridge.drives().is_open(0));
        assert_eq!(
            sdc_commands(&port),
            vec![SdcCommand::Inserted { drive: 0, size: 0 }]
        );
    }

    #[test]
    fn invalid_drive_is_rejected_without_bus_traffic() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        assert!(matches!(
            bridge.open_image(4, Some("DISK_A.ST")),
            Err(BridgeError::InvalidDrive(4))
        ));
        assert!(port.transactions().is_empty());
    }
}

// ============================================================================
// Translation
// ============================================================================

mod translate_tests {
    use super::*;

    #[test]
    fn first_sector_is_first_data_cluster() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        assert_eq!(bridge.translate(0, 0).unwrap(), Some(cluster_sector(5)));
    }

    #[test]
    fn sectors_follow_the_cluster_chain() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("/GAMES/DISK_B.ST")).unwrap();

        let chain = [10, 11, 20, 30];
        for sector in 0..16u32 {
            let cluster = chain[(sector / 4) as usize];
            assert_eq!(
                bridge.translate(0, sector).unwrap(),
                Some(cluster_sector(cluster) + sector % 4),
                "sector {sector}"
            );
        }
    }

    #[test]
    fn sectors_past_the_end_clamp_to_last_cluster() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        assert_eq!(bridge.translate(0, 100).unwrap(), Some(cluster_sector(7)));
    }

    #[test]
    fn empty_image_translates_to_zero() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge.open_image(2, Some("/GAMES/zeta.st")).unwrap();
        assert_eq!(bridge.translate(2, 0).unwrap(), Some(0));
    }

    #[test]
    fn reopen_discards_stale_link_table() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        let old: Vec<u32> = (0..12)
            .map(|s| bridge.translate(0, s).unwrap().unwrap())
            .collect();

        bridge.open_image(0, None).unwrap();
        bridge.open_image(0, Some("/GAMES/DISK_B.ST")).unwrap();

        for sector in 0..16 {
            let physical = bridge.translate(0, sector).unwrap().unwrap();
            assert!(!old.contains(&physical), "sector {sector} -> stale {physical}");
        }
    }

    #[test]
    fn link_table_grows_once_to_required_size() {
        let config = BridgeConfig {
            link_table_runs: 1,
            ..BridgeConfig::default()
        };
        let (bridge, _port) = make_bridge(config);
        bridge.open_image(0, Some("/GAMES/DISK_B.ST")).unwrap();

        let drives = bridge.drives();
        let image = drives.drive(0).unwrap().image.as_ref().unwrap();
        match &image.map {
            ClusterMap::Linked(table) => assert_eq!(
                table.runs(),
                &[
                    ClusterRun { len: 2, start: 10 },
                    ClusterRun { len: 1, start: 20 },
                    ClusterRun { len: 1, start: 30 },
                ]
            ),
            ClusterMap::ChainWalk => panic!("expected a link table"),
        }
    }

    #[test]
    fn chain_walk_fallback_gives_same_sectors() {
        let fast = make_bridge(BridgeConfig::default()).0;
        let slow = make_bridge(BridgeConfig {
            link_table_runs: 1,
            link_table_max_runs: 2,
            ..BridgeConfig::default()
        })
        .0;
        fast.open_image(0, Some("/GAMES/DISK_B.ST")).unwrap();
        slow.open_image(0, Some("/GAMES/DISK_B.ST")).unwrap();

        assert!(matches!(
            slow.drives().drive(0).unwrap().image.as_ref().unwrap().map,
            ClusterMap::ChainWalk
        ));
        for sector in 0..20 {
            assert_eq!(
                fast.translate(0, sector).unwrap(),
                slow.translate(0, sector).unwrap()
            );
        }
    }

    #[test]
    fn concurrent_opens_on_two_drives() {
        let (bridge, port) = make_bridge(BridgeConfig::default());

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    bridge.open_image(0, Some("DISK_A.ST")).unwrap();
                    assert_eq!(bridge.translate(0, 0).unwrap(), Some(cluster_sector(5)));
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    bridge.open_image(1, Some("/GAMES/DISK_B.ST")).unwrap();
                    assert_eq!(bridge.translate(1, 8).unwrap(), Some(cluster_sector(20)));
                }
            });
        });

        let drives = bridge.drives();
        let runs = |drive| match &drives.drive(drive).unwrap().image.as_ref().unwrap().map {
            ClusterMap::Linked(table) => table.runs().to_vec(),
            ClusterMap::ChainWalk => panic!("drive {drive} lost its link table"),
        };
        assert_eq!(runs(0), vec![ClusterRun { len: 3, start: 5 }]);
        assert_eq!(runs(1).len(), 3);
        drop(drives);

        // Every transaction is a complete INSERTED frame for one drive.
        let frames = port.transactions();
        assert_eq!(frames.len(), 2 * (1 + 2 * 199));
        for frame in frames {
            assert_eq!(frame.len(), 7, "interleaved frame {frame:02x?}");
            assert!(matches!(
                SdcCommand::decode(frame[1], &frame[2..]),
                Some(SdcCommand::Inserted { drive: 0 | 1, .. })
            ));
        }
    }
}

// ============================================================================
// Core requests and MCU reads
// ============================================================================

mod request_tests {
    use super::*;

    #[test]
    fn sector_request_answers_with_physical_sector() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        bridge.open_image(1, Some("/GAMES/DISK_B.ST")).unwrap();
        port.clear();
        request(&port, 1, 9);

        let served = bridge.handle_sd_request().unwrap().expect("request served");
        assert_eq!(served.drive, 1);
        assert_eq!(served.physical, cluster_sector(20) + 1);
        assert_eq!(
            sdc_commands(&port),
            vec![SdcCommand::Status, SdcCommand::CoreRw(cluster_sector(20) + 1)]
        );
    }

    #[test]
    fn request_for_empty_drive_is_not_answered() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        request(&port, 2, 0);
        assert_eq!(bridge.handle_sd_request().unwrap(), None);
        assert_eq!(sdc_commands(&port), vec![SdcCommand::Status]);
    }

    #[test]
    fn lowest_requesting_drive_wins() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        bridge.open_image(0, Some("DISK_A.ST")).unwrap();
        bridge.open_image(3, Some("/GAMES/DISK_B.ST")).unwrap();
        let status = SdcStatus {
            card: 0,
            request: 0b1001,
            sector: 0,
        };
        let mut miso = vec![0, 0];
        miso.extend_from_slice(&status.to_bytes());
        port.reply(Target::Sdc, SDC_STATUS, &miso);

        let served = bridge.handle_sd_request().unwrap().unwrap();
        assert_eq!(served.drive, 0);
        assert_eq!(served.physical, cluster_sector(5));
    }

    #[test]
    fn mcu_read_waits_for_ready() {
        let (bridge, port) = make_bridge(BridgeConfig::default());
        let mut miso = vec![0; 6];
        miso.extend_from_slice(&[0xFF, 0xFF, 0x00]);
        miso.extend((0..512).map(|i| i as u8));
        port.reply(Target::Sdc, SDC_MCU_READ, &miso);

        let mut buf = [0u8; 512];
        bridge.read_sector(0x0001_0203, &mut buf).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(buf[511], 0xFF);

        let txn = &port.transactions()[0];
        assert_eq!(&txn[..6], &[3, SDC_MCU_READ, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(txn.len(), 6 + 3 + 512);
        assert!(!port.is_selected());
    }

    #[test]
    fn mcu_read_times_out() {
        let (bridge, port) = make_bridge(BridgeConfig {
            mcu_read_timeout: 50,
            ..BridgeConfig::default()
        });
        let mut miso = vec![0; 6];
        miso.extend_from_slice(&[0xFF; 100]);
        port.reply(Target::Sdc, SDC_MCU_READ, &miso);

        let mut buf = [0u8; 512];
        assert!(matches!(
            bridge.read_sector(7, &mut buf),
            Err(BridgeError::Timeout)
        ));
        assert!(!port.is_selected());
        assert_eq!(port.transactions()[0].len(), 6 + 50);
    }
}

// ============================================================================
// Directory listing
// ============================================================================

mod dir_tests {
    use super::*;

    fn names(items: &[fpga_bridge_core::sdc::DirItem]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn browse_into_and_out_of_directories() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        let mut drives = bridge.drives();

        let root = drives.list_dir(0, None).unwrap();
        assert_eq!(names(&root), ["GAMES", "DISK_A.ST"]);

        let games = drives.list_dir(0, Some("GAMES")).unwrap();
        assert_eq!(names(&games), ["..", "DISK_B.ST", "zeta.st"]);
        assert_eq!(drives.cwd(0), Some("/GAMES"));
        assert_eq!(drives.cwd(1), Some(""));

        let up = drives.list_dir(0, Some("..")).unwrap();
        assert_eq!(names(&up), ["GAMES", "DISK_A.ST"]);
        drives.list_dir(0, Some("..")).unwrap();
        assert_eq!(drives.cwd(0), Some(""));
    }

    #[test]
    fn missing_directory_keeps_cwd() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        let mut drives = bridge.drives();
        drives.list_dir(0, Some("GAMES")).unwrap();
        assert!(drives.list_dir(0, Some("NOPE")).is_err());
        assert_eq!(drives.cwd(0), Some("/GAMES"));
    }

    #[test]
    fn default_image_is_remembered() {
        let (bridge, _port) = make_bridge(BridgeConfig::default());
        bridge
            .drives()
            .set_default(1, "/GAMES/DISK_B.ST")
            .unwrap();

        let path = {
            let drives = bridge.drives();
            assert_eq!(drives.image_name(1), Some("DISK_B.ST"));
            assert_eq!(drives.cwd(1), Some("/GAMES"));
            drives.image_path(1).unwrap()
        };
        assert_eq!(path, "/GAMES/DISK_B.ST");

        // A relative name resolves against the remembered directory.
        bridge.open_image(1, Some("DISK_B.ST")).unwrap();
        assert_eq!(bridge.translate(1, 0).unwrap(), Some(cluster_sector(10)));
    }
}
