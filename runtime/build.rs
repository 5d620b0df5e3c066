static NETWORKS: &[(&[&str], &[&str])] = &[
    (&["mainnet", "calibrationnet"], &[]),
    (&["devnet", "testing"], &["short-deal-updates"]),
];
const NETWORK_ENV: &str = "BUILD_FIL_NETWORK";

/// Enables _local_ compile features for the selected network. These only affect
/// conditional compilation in this crate, so actor crates depending on the runtime
/// pick up the network's policy without re-declaring the features themselves.
fn main() {
    let network = std::env::var(NETWORK_ENV).ok();
    println!("cargo:rerun-if-env-changed={}", NETWORK_ENV);

    let network = network.as_deref().unwrap_or("mainnet");
    let features = NETWORKS.iter().find(|(k, _)| k.contains(&network)).expect("unknown network").1;
    for feature in features {
        println!("cargo:rustc-cfg=feature=\"{}\"", feature);
    }
}
