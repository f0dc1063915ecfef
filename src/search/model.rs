//! Wire shapes of the provider's JSON response. Only the fields that end up
//! in a [`crate::model::SearchResult`] are declared; everything else is ignored.

use serde::Deserialize;

use crate::model::SearchResult;

#[derive(Deserialize, Debug)]
pub struct SearchEnvelope {
    pub d: SearchPayload,
}

#[derive(Deserialize, Debug)]
pub struct SearchPayload {
    pub results: Vec<ProviderResult>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

impl From<ProviderResult> for SearchResult {
    fn from(r: ProviderResult) -> Self {
        SearchResult {
            title: r.title,
            link: r.url,
            summary: r.description,
        }
    }
}
