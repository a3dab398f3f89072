mod data;
mod server;
mod solver;
mod validator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = server::Settings::from_env()?;
    server::run_server(settings).await
}
