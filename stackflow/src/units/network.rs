//! Network boundary shared by the service and the pipeline.

use super::keys;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit};
use serde_json::json;

/// A VPC with public and private-with-egress subnets.
#[derive(Debug, Clone)]
pub struct NetworkBoundary {
    name: String,
    region: String,
    cidr: String,
    max_azs: u8,
}

impl NetworkBoundary {
    /// Creates a two-AZ network with the default CIDR.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
        }
    }

    /// Sets the number of availability zones.
    #[must_use]
    pub fn with_max_azs(mut self, max_azs: u8) -> Self {
        self.max_azs = max_azs;
        self
    }
}

impl ResourceUnit for NetworkBoundary {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        vec![keys::NETWORK_VPC_ID.to_string()]
    }

    fn declarations(
        &self,
        _inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        Ok(vec![ResourceDeclaration::new("MensajeVpc", "AWS::EC2::VPC").with_properties(json!({
            "CidrBlock": self.cidr,
            "MaxAzs": self.max_azs,
            "SubnetConfiguration": [
                { "Name": "public", "SubnetType": "PUBLIC" },
                { "Name": "private", "SubnetType": "PRIVATE_WITH_EGRESS" }
            ]
        }))])
    }
}
