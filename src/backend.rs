use serde::Serialize;

/// S3 location of the provisioning engine's state for one application.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateBackend {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub dynamodb_table: String,
    pub encrypt: bool,
}

impl StateBackend {
    pub fn new(app_name: &str, region: &str, account: &str) -> Self {
        let bucket = format!("{account}-terraform-{region}");
        Self {
            key: format!("service/{app_name}/terraform.tfstate"),
            region: region.to_string(),
            dynamodb_table: bucket.clone(),
            bucket,
            encrypt: true,
        }
    }
}
