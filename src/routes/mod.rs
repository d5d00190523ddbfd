/// Router Module Index
///
/// Routes are grouped by who may reach them. The authorization gate wrapping the whole
/// router enforces the grouping; the modules only keep the surfaces apart.

/// Visitor surface and session endpoints. Reads need no session.
pub mod public;

/// Routes for any signed-in account whose credential has not expired.
pub mod authenticated;

/// Account management, reachable by the MASTER role only.
pub mod master;
