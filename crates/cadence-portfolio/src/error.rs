//! Error types for portfolio aggregation.

/// The result type used throughout cadence-portfolio.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Errors that can occur computing portfolio rollups.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    /// The board is not classified as a meta-board.
    #[error("board {board_id} is not a meta-board")]
    NotMetaBoard {
        /// The board that was queried.
        board_id: String,
    },

    /// No synced issue data exists for the board.
    #[error("no synced data for board {board_id}")]
    NoBoardData {
        /// The board that was queried.
        board_id: String,
    },

    /// Velocity inputs cannot parameterize a forecast (no history, or all
    /// samples zero).
    #[error("degenerate velocity for {project_key}: {message}")]
    DegenerateVelocity {
        /// The project whose history is unusable.
        project_key: String,
        /// Why the inputs are degenerate.
        message: String,
    },

    /// Forecast parameters are inconsistent (e.g. `max < min`).
    #[error("invalid forecast input: {message}")]
    InvalidForecastInput {
        /// Description of the inconsistency.
        message: String,
    },

    /// A filter expression could not be hashed for cache keying.
    #[error("invalid snapshot filter: {message}")]
    InvalidFilter {
        /// Description of the problem.
        message: String,
    },
}
