#[tokio::main]
async fn main() {
    site_api::start_server().await;
}
