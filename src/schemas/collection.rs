use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Collection;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CollectionCreateRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub(crate) name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CollectionUpdateRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub(crate) name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CollectionResponse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl CollectionResponse {
    pub(crate) fn from_db(collection: Collection) -> Self {
        Self {
            id: collection.id,
            name: collection.name,
            created_at: format_primitive(collection.created_at),
            updated_at: format_primitive(collection.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CollectionListItem {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) problem_count: i64,
}
