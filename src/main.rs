//! Loyalty ledger server binary.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loyalty_ledger::server::run().await
}
