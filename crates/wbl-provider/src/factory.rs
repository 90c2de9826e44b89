//! Provider Factory
//!
//! Picks the decoder for the configured vendor, wires the transport
//! (serial port, bridge relay or CAN subscription) and starts the result.

use crate::bridge::{handshake, Bridge, Subscription, SYSTEM_MSG_WBL_READING};
use crate::config::{TransportConfig, WblConfig};
use crate::error::WblError;
use crate::provider::{ForwardMode, LambdaProvider, Source, WidebandProvider};
use crate::transport::SerialSettings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wbl_protocol::ecumaster;
use wbl_protocol::{
    AemDecoder, AemInput, CombiDecoder, Decoder, EcuMasterDecoder, Isp2Decoder, PlxDecoder,
    StagDecoder, Vendor, ZeitronixDecoder,
};

/// Largest 29-bit CAN identifier
const MAX_CAN_ID: u32 = 0x1FFF_FFFF;

/// Default AEM X-Series identifier
const AEM_CAN_ID: u32 = 0x180;

/// Transport wiring resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
enum Wiring {
    Serial(SerialSettings),
    Subscription {
        subscription: Subscription,
        mode: ForwardMode,
        /// Vendor tag for the relay handshake
        handshake: Option<u8>,
    },
}

/// Build and start the provider described by `cfg`.
///
/// Returns `Ok(None)` when no external wideband is configured (lambda then
/// comes from the ECU log), or when a bridge relay is selected without a
/// bridge; the latter is reported through the configured logger.
pub async fn new_provider(
    cfg: &WblConfig,
    bridge: Option<Arc<dyn Bridge>>,
    cancel: CancellationToken,
) -> Result<Option<Box<dyn LambdaProvider>>, WblError> {
    if !cfg.vendor.is_external() {
        return Ok(None);
    }

    if cfg.transport.is_bridge_relay() && bridge.is_none() {
        cfg.log(
            "please correct your WBL configuration. bridge port is selected but not using a bridge adapter",
        );
        return Ok(None);
    }

    let wiring = resolve(cfg)?;
    info!("Starting {} over {}", cfg.vendor, cfg.transport.kind());

    let provider: Box<dyn LambdaProvider> = match cfg.vendor {
        Vendor::Innovate => launch(cfg, Isp2Decoder::new(), wiring, bridge, cancel).await?,
        Vendor::Aem => {
            let input = match cfg.transport {
                TransportConfig::Serial { .. } => AemInput::SerialAscii,
                TransportConfig::Relay { .. } => AemInput::RelayAscii,
                TransportConfig::Can { .. } => AemInput::Can,
            };
            launch(cfg, AemDecoder::new(input), wiring, bridge, cancel).await?
        }
        Vendor::Plx => {
            launch(cfg, PlxDecoder::new(cfg.plx_units.clone()), wiring, bridge, cancel).await?
        }
        Vendor::EcuMaster => {
            let base = cfg.can_id().unwrap_or(ecumaster::BASE_ID);
            launch(cfg, EcuMasterDecoder::with_base_id(base), wiring, bridge, cancel).await?
        }
        Vendor::Combi => launch(cfg, CombiDecoder::new(), wiring, bridge, cancel).await?,
        Vendor::Zeitronix => launch(cfg, ZeitronixDecoder::new(), wiring, bridge, cancel).await?,
        Vendor::Stag => launch(cfg, StagDecoder::new(), wiring, bridge, cancel).await?,
        Vendor::None | Vendor::Ecu => return Ok(None),
    };
    Ok(Some(provider))
}

/// Resolve the wiring, rejecting transports the vendor cannot use
fn resolve(cfg: &WblConfig) -> Result<Wiring, WblError> {
    let vendor = cfg.vendor;
    let unsupported = || WblError::UnsupportedTransport {
        vendor,
        transport: cfg.transport.kind(),
    };

    match &cfg.transport {
        TransportConfig::Serial { device, .. } => {
            let baud_rate = match cfg.baud_rate() {
                Some(baud) if vendor.supports_serial() => baud,
                _ => return Err(unsupported()),
            };
            if device.is_empty() {
                return Err(WblError::Config("serial device not set".to_string()));
            }
            Ok(Wiring::Serial(SerialSettings {
                device: device.clone(),
                baud_rate,
                read_timeout: vendor.read_timeout(),
            }))
        }
        TransportConfig::Relay { tag } => {
            if !cfg.transport.is_bridge_relay() {
                return Err(WblError::Config(format!("unknown relay tag: {}", tag)));
            }
            if !vendor.supports_relay() {
                return Err(unsupported());
            }
            Ok(Wiring::Subscription {
                subscription: Subscription::SystemMessage(SYSTEM_MSG_WBL_READING),
                mode: ForwardMode::Payload,
                handshake: vendor.bridge_tag(),
            })
        }
        TransportConfig::Can { .. } => match vendor {
            Vendor::Aem => Ok(Wiring::Subscription {
                subscription: Subscription::CanIds(vec![can_id(cfg, AEM_CAN_ID, MAX_CAN_ID)?]),
                mode: ForwardMode::ExtendedFrames,
                handshake: None,
            }),
            Vendor::EcuMaster => {
                let base = can_id(cfg, ecumaster::BASE_ID, ecumaster::MAX_BASE_ID)?;
                Ok(Wiring::Subscription {
                    subscription: Subscription::CanIds(EcuMasterDecoder::with_base_id(base).ids()),
                    mode: ForwardMode::Frames,
                    handshake: None,
                })
            }
            _ => Err(unsupported()),
        },
    }
}

/// Configured identifier, or `fallback`; anything above `max` is rejected
fn can_id(cfg: &WblConfig, fallback: u32, max: u32) -> Result<u32, WblError> {
    let id = cfg.can_id().unwrap_or(fallback);
    if id > max {
        return Err(WblError::Config(format!(
            "CAN id {:#X} out of range, max {:#X}",
            id, max
        )));
    }
    Ok(id)
}

async fn launch<D: Decoder>(
    cfg: &WblConfig,
    decoder: D,
    wiring: Wiring,
    bridge: Option<Arc<dyn Bridge>>,
    cancel: CancellationToken,
) -> Result<Box<dyn LambdaProvider>, WblError> {
    let vendor = decoder.vendor();
    let mut provider = match wiring {
        Wiring::Serial(settings) => {
            WidebandProvider::new(decoder, Source::Serial(settings), cfg.logger.clone())
        }
        Wiring::Subscription {
            subscription,
            mode,
            handshake: tag,
        } => {
            let bridge = bridge.ok_or(WblError::BridgeUnavailable(vendor))?;
            let mut provider = WidebandProvider::new(decoder, Source::Push, cfg.logger.clone());
            // subscribe before the handshake so the first payload is not missed
            let rx = bridge.subscribe(subscription, cfg.relay_channel_capacity);
            if let Some(tag) = tag {
                bridge.send_system(&handshake(tag)).await?;
            }
            provider.attach_subscription(rx, mode);
            provider
        }
    }
    .with_pacing(cfg.stag_pacing());

    provider.start(cancel).await?;
    Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeFrame, MemoryBridge};
    use crate::provider::ProviderState;
    use std::sync::Mutex;
    use std::time::Duration;
    use wbl_protocol::innovate::encode_frame;

    fn cfg(vendor: Vendor, transport: TransportConfig) -> WblConfig {
        WblConfig::new(vendor, transport)
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_none_and_ecu_build_nothing() {
        for vendor in [Vendor::None, Vendor::Ecu] {
            let provider = new_provider(&cfg(vendor, TransportConfig::default()), None, CancellationToken::new())
                .await
                .unwrap();
            assert!(provider.is_none());
        }
    }

    #[tokio::test]
    async fn test_bridge_relay_without_bridge_is_a_config_hint() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let config = cfg(Vendor::Innovate, TransportConfig::bridge())
            .with_logger(Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string())));

        let provider = new_provider(&config, None, CancellationToken::new()).await.unwrap();
        assert!(provider.is_none());
        assert!(lines.lock().unwrap()[0].starts_with("please correct your WBL configuration"));
    }

    #[tokio::test]
    async fn test_innovate_relay_handshake_and_forwarding() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut provider = new_provider(
            &cfg(Vendor::Innovate, TransportConfig::bridge()),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(bridge.sent(), vec![vec![b'w', 1, b'i', b'i']]);
        assert_eq!(provider.state(), ProviderState::Running);

        bridge.publish(BridgeFrame::system(encode_frame(0, 14.7, 0.87))).await;
        wait_for(|| (provider.get_lambda() - 0.87).abs() < 1e-9).await;

        provider.stop().await;
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_aem_relay_ascii() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut provider = new_provider(
            &cfg(Vendor::Aem, TransportConfig::bridge()),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(bridge.sent(), vec![vec![b'w', 1, b'a', b'a']]);

        bridge.publish(BridgeFrame::system(b"102".to_vec())).await;
        wait_for(|| (provider.get_lambda() - 10.2).abs() < 1e-9).await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_aem_can_takes_extended_frames_only() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut provider = new_provider(
            &cfg(Vendor::Aem, TransportConfig::Can { frame_id: None }),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(bridge.sent().is_empty());

        let standard = BridgeFrame::can(0x180, vec![0x1F, 0x40, 0, 0, 120, 0, 0x80, 0], false);
        let extended = BridgeFrame::can(0x180, vec![0x27, 0x10, 0, 0, 120, 0, 0x80, 0], true);
        bridge.publish(standard).await;
        bridge.publish(extended).await;

        wait_for(|| provider.reading().has_data()).await;
        assert!((provider.get_lambda() - 1.0).abs() < 1e-9);
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_ecumaster_both_frames() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut provider = new_provider(
            &cfg(Vendor::EcuMaster, TransportConfig::Can { frame_id: None }),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        bridge
            .publish(BridgeFrame::can(0x664, vec![0x05, 0x64, 0x80, 185, 0x03, 0xE6, 0x28, 0x00], false))
            .await;
        bridge
            .publish(BridgeFrame::can(0x665, vec![0x00, 0xFA, 0x00, 0xFA, 0x0B, 0xB8, 0x07, 0x01], false))
            .await;

        wait_for(|| provider.reading().status == wbl_protocol::LambdaStatus::Normal).await;
        assert!((provider.get_lambda() - 0.998).abs() < 1e-9);
        assert!(provider.describe().contains("Heater State:      Regulation"));
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_combi_relay_without_handshake() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut provider = new_provider(
            &cfg(Vendor::Combi, TransportConfig::bridge()),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(bridge.sent().is_empty());

        bridge.publish(BridgeFrame::system(b"9.5\0".to_vec())).await;
        wait_for(|| (provider.get_lambda() - 0.95).abs() < 1e-9).await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_offline_bridge_fails_start() {
        let bridge = Arc::new(MemoryBridge::new());
        bridge.set_offline(true);
        let result = new_provider(
            &cfg(Vendor::Zeitronix, TransportConfig::bridge()),
            Some(bridge.clone()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WblError::Bridge(_))));
    }

    #[tokio::test]
    async fn test_unsupported_transports() {
        let cases = [
            (Vendor::Stag, TransportConfig::bridge()),
            (Vendor::EcuMaster, TransportConfig::serial("/dev/ttyUSB0")),
            (Vendor::Combi, TransportConfig::serial("/dev/ttyUSB0")),
            (Vendor::Innovate, TransportConfig::Can { frame_id: None }),
        ];
        let bridge: Arc<dyn Bridge> = Arc::new(MemoryBridge::new());
        for (vendor, transport) in cases {
            let result = new_provider(&cfg(vendor, transport), Some(bridge.clone()), CancellationToken::new()).await;
            assert!(
                matches!(result, Err(WblError::UnsupportedTransport { .. })),
                "{:?} should be rejected",
                vendor
            );
        }
    }

    #[tokio::test]
    async fn test_can_without_bridge_is_an_error() {
        let result = new_provider(
            &cfg(Vendor::EcuMaster, TransportConfig::Can { frame_id: None }),
            None,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WblError::BridgeUnavailable(Vendor::EcuMaster))));
    }

    #[tokio::test]
    async fn test_missing_serial_port_propagates() {
        let result = new_provider(
            &cfg(Vendor::Innovate, TransportConfig::serial("/dev/does-not-exist-wbl")),
            None,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WblError::Serial(_))));
    }

    #[test]
    fn test_can_id_range() {
        let can = |frame_id| TransportConfig::Can { frame_id: Some(frame_id) };

        for (vendor, id) in [
            (Vendor::EcuMaster, u32::MAX),
            (Vendor::EcuMaster, 0x1FFF_FFFF),
            (Vendor::Aem, 0x2000_0000),
        ] {
            assert!(
                matches!(resolve(&cfg(vendor, can(id))), Err(WblError::Config(_))),
                "{:?} {:#X} should be rejected",
                vendor,
                id
            );
        }

        assert_eq!(
            resolve(&cfg(Vendor::EcuMaster, can(0x1FFF_FFFE))).unwrap(),
            Wiring::Subscription {
                subscription: Subscription::CanIds(vec![0x1FFF_FFFE, 0x1FFF_FFFF]),
                mode: ForwardMode::Frames,
                handshake: None,
            }
        );
    }
}
