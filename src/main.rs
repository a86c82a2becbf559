#[tokio::main]
async fn main() {
    dq_engine::boot::boot().await;
}
