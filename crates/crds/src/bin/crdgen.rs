//! Prints the HelloWorld CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > helloworld-crd.yaml`

use crds::HelloWorld;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&HelloWorld::crd())?;
    print!("{crd}");
    Ok(())
}
