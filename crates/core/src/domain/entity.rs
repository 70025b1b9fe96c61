use serde::{Deserialize, Serialize};

/// Business record kinds that can be routed through an approval workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Submittal,
    Rfi,
    ChangeOrder,
}

impl EntityType {
    pub const ALL: [EntityType; 4] =
        [EntityType::Document, EntityType::Submittal, EntityType::Rfi, EntityType::ChangeOrder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Submittal => "submittal",
            Self::Rfi => "rfi",
            Self::ChangeOrder => "change_order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" => Some(Self::Document),
            "submittal" => Some(Self::Submittal),
            "rfi" => Some(Self::Rfi),
            "change_order" => Some(Self::ChangeOrder),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Submittal => "Submittal",
            Self::Rfi => "RFI",
            Self::ChangeOrder => "Change Order",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Document => "file-text",
            Self::Submittal => "clipboard-check",
            Self::Rfi => "help-circle",
            Self::ChangeOrder => "git-pull-request",
        }
    }

    /// Path of the entity's detail view in the web client.
    pub fn route(&self, entity_id: &str) -> String {
        match self {
            Self::Document => format!("/documents/{entity_id}"),
            Self::Submittal => format!("/submittals/{entity_id}"),
            Self::Rfi => format!("/rfis/{entity_id}"),
            Self::ChangeOrder => format!("/change-orders/{entity_id}"),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client needs to show an entity and navigate to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    pub label: String,
    pub icon: String,
    pub route: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self { entity_type, entity_id: entity_id.into() }
    }

    pub fn link(&self) -> EntityLink {
        EntityLink {
            label: format!("{} {}", self.entity_type.label(), self.entity_id),
            icon: self.entity_type.icon().to_string(),
            route: self.entity_type.route(&self.entity_id),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityRef, EntityType};

    #[test]
    fn storage_encoding_parses_back_for_every_type() {
        for entity_type in EntityType::ALL {
            assert_eq!(EntityType::parse(entity_type.as_str()), Some(entity_type));
        }
    }

    #[test]
    fn parse_is_case_and_whitespace_tolerant() {
        assert_eq!(EntityType::parse("  Change_Order "), Some(EntityType::ChangeOrder));
        assert_eq!(EntityType::parse("RFI"), Some(EntityType::Rfi));
        assert_eq!(EntityType::parse("invoice"), None);
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&EntityType::ChangeOrder).expect("serialize");
        assert_eq!(json, "\"change_order\"");
    }

    #[test]
    fn route_and_label_tables_cover_each_type() {
        assert_eq!(EntityType::Rfi.route("RFI-12"), "/rfis/RFI-12");
        assert_eq!(EntityType::ChangeOrder.route("CO-3"), "/change-orders/CO-3");
        assert_eq!(EntityType::Rfi.label(), "RFI");

        let link = EntityRef::new(EntityType::ChangeOrder, "CO-3").link();
        assert_eq!(link.label, "Change Order CO-3");
        assert_eq!(link.icon, "git-pull-request");
        assert_eq!(link.route, "/change-orders/CO-3");
        assert_eq!(EntityRef::new(EntityType::Submittal, "S-9").to_string(), "submittal:S-9");
    }
}
