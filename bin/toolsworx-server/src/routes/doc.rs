use crate::routes::{admin, api, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "toolsworx-server",
    description = "File, media and image conversion jobs behind the ToolsWorx web tools",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(api::api_docs());
    root.merge(admin::api_docs());
    root
}
