use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Authenticated caller, put in request extensions by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: ObjectId,
}
