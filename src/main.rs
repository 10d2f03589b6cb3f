use ocimon::{driver, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    driver::run(Config::default()).await?;
    Ok(())
}
