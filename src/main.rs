use registry_ui::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    let runner = Runner::new(args);

    if let Err(e) = runner.run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
