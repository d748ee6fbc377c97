//! Capability probe: which adapters on this host can actually decode.
//!
//! Enumeration alone is not proof of a working decode path, so the probe
//! runs a trial session per adapter and requires one real decode of the
//! caller's sample to succeed before reporting the adapter.

use crate::backend::Backend;
use crate::common::{AdapterDesc, DataFormat, DecodeConfig, HwApi, RawDeviceHandle, PROBE_VENDORS};
use crate::session::{DecodeOutcome, DecoderSession};
use log::debug;
use std::sync::Arc;

/// Probe every known vendor's adapters with a sample bitstream, in vendor
/// order, stopping once `max_results` adapters qualified. Adapters that fail
/// session creation or the trial decode are skipped silently.
pub fn probe(
    backend: &Arc<dyn Backend>,
    max_results: usize,
    api: HwApi,
    data_format: DataFormat,
    sample: &[u8],
) -> Vec<AdapterDesc> {
    let mut found = Vec::new();
    if max_results == 0 || sample.is_empty() {
        return found;
    }

    'vendors: for vendor in PROBE_VENDORS {
        for adapter in backend.enumerate_adapters(vendor) {
            let config = DecodeConfig {
                device: RawDeviceHandle::default(),
                luid: adapter.luid,
                api,
                data_format,
                output_shared_handle: false,
            };
            let mut session = match DecoderSession::new(backend.clone(), config) {
                Ok(session) => session,
                Err(err) => {
                    debug!("probe: {:?} luid={} skipped: {err}", vendor, adapter.luid);
                    continue;
                }
            };
            // The trial must deliver a frame; buffering does not qualify.
            match session.decode(sample, None) {
                Ok(DecodeOutcome::Delivered(_)) => {
                    found.push(adapter);
                    session.destroy();
                    if found.len() >= max_results {
                        break 'vendors;
                    }
                }
                other => {
                    debug!(
                        "probe: {:?} luid={} trial decode skipped: {other:?}",
                        vendor, adapter.luid
                    );
                    session.destroy();
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AdapterVendor, Luid};
    use crate::mock::{sample_au, AuFlags, MockBackend};

    fn backend_with(vendors: &[(AdapterVendor, i64)]) -> Arc<dyn Backend> {
        let backend = MockBackend::new();
        for (vendor, luid) in vendors {
            backend.state().add_adapter(*vendor, Luid(*luid));
        }
        backend
    }

    #[test]
    fn probe_reports_only_adapters_that_decode() {
        let backend = MockBackend::new();
        backend.state().add_adapter(AdapterVendor::Intel, Luid(1));
        backend.state().add_adapter(AdapterVendor::Nvidia, Luid(2));
        backend.state().fail_device_for(Luid(1));
        let backend: Arc<dyn Backend> = backend;

        let sample = sample_au(640, 480, AuFlags::default());
        let found = probe(&backend, 8, HwApi::D3d11, DataFormat::H264, &sample);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].luid, Luid(2));
    }

    #[test]
    fn probe_caps_results_at_max() {
        let backend = backend_with(&[
            (AdapterVendor::Intel, 1),
            (AdapterVendor::Nvidia, 2),
            (AdapterVendor::Amd, 3),
        ]);
        let sample = sample_au(640, 480, AuFlags::default());
        let found = probe(&backend, 2, HwApi::D3d11, DataFormat::H265, &sample);
        assert_eq!(found.len(), 2);
        // Vendor order is fixed, so the cap cuts from the tail.
        assert_eq!(found[0].luid, Luid(1));
        assert_eq!(found[1].luid, Luid(2));
    }

    #[test]
    fn probe_with_undecodable_sample_finds_nothing() {
        let backend = backend_with(&[(AdapterVendor::Nvidia, 2)]);
        let sample = sample_au(640, 480, AuFlags::rejected());
        let found = probe(&backend, 8, HwApi::D3d11, DataFormat::H264, &sample);
        assert!(found.is_empty());
    }

    #[test]
    fn probe_with_no_sample_or_zero_cap_is_empty() {
        let backend = backend_with(&[(AdapterVendor::Nvidia, 2)]);
        let sample = sample_au(640, 480, AuFlags::default());
        assert!(probe(&backend, 0, HwApi::D3d11, DataFormat::H264, &sample).is_empty());
        assert!(probe(&backend, 8, HwApi::D3d11, DataFormat::H264, &[]).is_empty());
    }
}
