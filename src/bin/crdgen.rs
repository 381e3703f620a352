//! Prints the operator CRDs as a multi-document YAML stream

use lifecycle_manager::crd::crds;

fn main() -> anyhow::Result<()> {
    for crd in crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
