/// The distributor of this csvgate client.
///
/// Set `CSVGATE_DISTRIBUTOR` at build time to override.
pub const CSVGATE_DISTRIBUTOR: &str = if let Some(distro) = option_env!("CSVGATE_DISTRIBUTOR") {
    distro
} else {
    "unknown"
};
