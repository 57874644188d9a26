//! Seam for the optional adaptive parameter layer.
//!
//! The advisor never sits on a hot path: parameter advice is consulted once
//! per scatter and re-validated, and access events flow through a bounded
//! channel with `try_send`; a slow or absent consumer just loses events.

use crate::manifest::ManifestId;
use crate::params::{ParameterOverrides, ParameterSet};
use std::time::Duration;

/// Which operation produced an [`AccessEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessOp {
    Scatter,
    Gather,
    Rescatter,
}

/// One engine access, as fed to the adaptive layer.
#[derive(Clone, Debug)]
pub struct AccessEvent {
    pub manifest_id: ManifestId,
    pub op: AccessOp,
    pub bytes: u64,
    pub latency: Duration,
}

/// Per-file parameter advice.
///
/// Implementations see the file name and the engine defaults and may return
/// an override record; the engine validates whatever comes back, so a
/// misbehaving advisor can never break correctness.
pub trait ParameterAdvisor: Send + Sync {
    fn advise(&self, name: &str, defaults: &ParameterSet) -> Option<ParameterOverrides>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdvisor;

    impl ParameterAdvisor for FixedAdvisor {
        fn advise(&self, name: &str, _defaults: &ParameterSet) -> Option<ParameterOverrides> {
            if name.ends_with(".tmp") {
                Some(ParameterOverrides { redundancy: Some(1), ..Default::default() })
            } else {
                None
            }
        }
    }

    #[test]
    fn advice_is_merged_through_validation() {
        let advisor = FixedAdvisor;
        let defaults = ParameterSet::default();
        let over = advisor.advise("scratch.tmp", &defaults).unwrap();
        let merged = over.apply(defaults).unwrap();
        assert_eq!(merged.redundancy, 1);
        assert!(advisor.advise("keep.dat", &defaults).is_none());
    }
}
