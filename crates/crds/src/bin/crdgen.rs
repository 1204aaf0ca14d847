//! # CRD Generator
//!
//! Prints the `EtcdadmConfig` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run -p crds --bin crdgen > config/crd/etcdadmconfigs.yaml
//! ```

use anyhow::Context;
use crds::EtcdadmConfig;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = EtcdadmConfig::crd();
    let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD to YAML")?;
    print!("{yaml}");
    Ok(())
}
