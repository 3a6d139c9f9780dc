//! Identity and value sources

use fl_types::{ClientIdentity, Round};

/// Supplies the ordered client identities for a run
pub trait IdentityProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn identities(&self) -> Result<Vec<ClientIdentity>, Self::Error>;
}

/// Supplies the raw weight a client submits for a round
///
/// `None` means no value is available. Non-finite values are treated as
/// invalid by the orchestrator; both cases skip the client for that round.
pub trait ValueSource: Send + Sync {
    fn value_for(&self, round: Round, client_index: usize) -> Option<f64>;
}

impl<F> ValueSource for F
where
    F: Fn(Round, usize) -> Option<f64> + Send + Sync,
{
    fn value_for(&self, round: Round, client_index: usize) -> Option<f64> {
        self(round, client_index)
    }
}
