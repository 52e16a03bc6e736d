use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport used to download extracts; swapped out in tests or when a
/// mirror needs extra headers.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
