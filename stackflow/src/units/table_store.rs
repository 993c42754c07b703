//! Key-value tables backing the message service.

use super::keys;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Attribute type of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    /// String attribute.
    String,
    /// Numeric attribute.
    Number,
}

/// A key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    /// Attribute name.
    pub name: String,
    /// Attribute type.
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

impl KeyAttribute {
    /// A string key.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::String,
        }
    }

    /// A number key.
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::Number,
        }
    }
}

/// A global secondary index projecting all attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    /// Index name.
    pub name: String,
    /// Partition key of the index.
    pub partition_key: KeyAttribute,
}

/// One on-demand table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Logical id inside the unit.
    pub logical_id: String,
    /// Physical table name; also the suffix of the output key.
    pub table_name: String,
    /// Partition key.
    pub partition_key: KeyAttribute,
    /// Optional sort key.
    pub sort_key: Option<KeyAttribute>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<SecondaryIndex>,
}

impl TableDefinition {
    /// Creates a table with a partition key only.
    #[must_use]
    pub fn new(
        logical_id: impl Into<String>,
        table_name: impl Into<String>,
        partition_key: KeyAttribute,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            table_name: table_name.into(),
            partition_key,
            sort_key: None,
            indexes: Vec::new(),
        }
    }

    /// Sets the sort key.
    #[must_use]
    pub fn with_sort_key(mut self, key: KeyAttribute) -> Self {
        self.sort_key = Some(key);
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, partition_key: KeyAttribute) -> Self {
        self.indexes.push(SecondaryIndex {
            name: name.into(),
            partition_key,
        });
        self
    }

    /// Output key under which the provisioned table name is exposed.
    #[must_use]
    pub fn output_key(&self) -> String {
        keys::table(&self.table_name)
    }

    fn declaration(&self) -> ResourceDeclaration {
        let partition = &self.partition_key;
        let mut key_schema = vec![json!({ "AttributeName": partition.name, "KeyType": "HASH" })];
        let mut attributes =
            vec![json!({ "AttributeName": partition.name, "AttributeType": partition.key_type })];
        if let Some(sort) = &self.sort_key {
            key_schema.push(json!({ "AttributeName": sort.name, "KeyType": "RANGE" }));
            attributes.push(json!({ "AttributeName": sort.name, "AttributeType": sort.key_type }));
        }

        let indexes: Vec<_> = self
            .indexes
            .iter()
            .map(|index| {
                json!({
                    "IndexName": index.name,
                    "KeySchema": [{ "AttributeName": index.partition_key.name, "KeyType": "HASH" }],
                    "Projection": { "ProjectionType": "ALL" }
                })
            })
            .collect();
        for index in &self.indexes {
            let known = attributes
                .iter()
                .any(|a| a["AttributeName"] == json!(index.partition_key.name));
            if !known {
                attributes.push(json!({
                    "AttributeName": index.partition_key.name,
                    "AttributeType": index.partition_key.key_type
                }));
            }
        }

        ResourceDeclaration::new(&self.logical_id, "AWS::DynamoDB::Table").with_properties(json!({
            "TableName": self.table_name,
            "KeySchema": key_schema,
            "AttributeDefinitions": attributes,
            "GlobalSecondaryIndexes": indexes,
            "BillingMode": "PAY_PER_REQUEST",
            "DeletionPolicy": "Delete"
        }))
    }
}

/// Leaf unit owning the service's tables.
#[derive(Debug, Clone)]
pub struct TableStore {
    name: String,
    region: String,
    tables: Vec<TableDefinition>,
}

impl TableStore {
    /// Creates a store with no tables.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            tables: Vec::new(),
        }
    }

    /// The `mensajes`, `seguidores` and `timeline` tables.
    #[must_use]
    pub fn mensaje(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(name, region)
            .with_table(
                TableDefinition::new(
                    "MessagesTable",
                    keys::TABLE_MENSAJES_NAME,
                    KeyAttribute::string("user_id"),
                )
                .with_sort_key(KeyAttribute::string("message_id")),
            )
            .with_table(
                TableDefinition::new(
                    "FollowsTable",
                    keys::TABLE_SEGUIDORES_NAME,
                    KeyAttribute::string("follower_id"),
                )
                .with_sort_key(KeyAttribute::string("following_id"))
                .with_index("FollowingIndex", KeyAttribute::string("following_id")),
            )
            .with_table(
                TableDefinition::new(
                    "TimelineTable",
                    keys::TABLE_TIMELINE_NAME,
                    KeyAttribute::string("user_id"),
                )
                .with_sort_key(KeyAttribute::number("timestamp")),
            )
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// The declared tables.
    #[must_use]
    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }
}

impl ResourceUnit for TableStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        self.tables.iter().map(TableDefinition::output_key).collect()
    }

    fn declarations(
        &self,
        _inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        Ok(self.tables.iter().map(TableDefinition::declaration).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mensaje_tables() {
        let store = TableStore::mensaje("MensajeTableStack", "us-east-1");
        assert_eq!(
            store.produces(),
            vec!["table.mensajes", "table.seguidores", "table.timeline"]
        );

        let decls = store.declarations(&ResolvedInputs::new("MensajeTableStack")).unwrap();
        assert_eq!(decls.len(), 3);
        let follows = &decls[1].properties;
        assert_eq!(follows["GlobalSecondaryIndexes"][0]["IndexName"], "FollowingIndex");
        assert_eq!(follows["AttributeDefinitions"].as_array().unwrap().len(), 2);
        assert_eq!(decls[2].properties["AttributeDefinitions"][1]["AttributeType"], "NUMBER");
        assert_eq!(decls[0].properties["BillingMode"], "PAY_PER_REQUEST");
    }
}
