//! Binary entry point for the hearth home service.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lib_hearth::init().await
}
