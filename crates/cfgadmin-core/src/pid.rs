//! Factory member pid minting

use rand::RngCore;

/// Mint a fresh member pid for a factory.
///
/// The suffix is a version 4 UUID built from 16 bytes drawn from `rng`,
/// so a seeded generator gives reproducible pids.
pub fn create_pid<R: RngCore + ?Sized>(factory_pid: &str, rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    let suffix = uuid::Builder::from_random_bytes(bytes).into_uuid();
    format!("{factory_pid}.{}", suffix.hyphenated())
}
