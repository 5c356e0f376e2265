//! Node liveness and load, as seen by placement and the read path.

use crate::NodeName;

/// Load score reported for nodes that are known offline.
pub const OFFLINE_LOAD_SCORE: f64 = f64::MAX;

/// Answers "is this node usable right now" and "how busy is it".
///
/// Implementations must be cheap and non-blocking; placement calls them
/// once per candidate on every request.
pub trait HealthOracle: Send + Sync {
    /// Whether the node is reachable.
    fn is_online(&self, node: &NodeName) -> bool;

    /// Relative load in `[0, 1]`, lower is better. Offline nodes report
    /// [`OFFLINE_LOAD_SCORE`].
    fn load_score(&self, node: &NodeName) -> f64;
}

/// Treats every node as online with equal load.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOnline;

impl HealthOracle for AllOnline {
    fn is_online(&self, _node: &NodeName) -> bool {
        true
    }

    fn load_score(&self, _node: &NodeName) -> f64 {
        0.0
    }
}
