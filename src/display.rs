//! Presentation descriptors for statuses and categories.
//!
//! Both tables are static configuration; nothing in the lifecycle reads them.

use serde::Serialize;

use crate::model::{Category, Status};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Info,
    Progress,
    Attention,
    Success,
    Danger,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatusBadge {
    pub label: &'static str,
    pub tone: Tone,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CategoryStyle {
    pub label: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

pub fn status_badge(status: Status) -> StatusBadge {
    match status {
        Status::Unassigned => StatusBadge {
            label: "Available",
            tone: Tone::Neutral,
        },
        Status::Assigned => StatusBadge {
            label: "To do",
            tone: Tone::Info,
        },
        Status::InProgress => StatusBadge {
            label: "In progress",
            tone: Tone::Progress,
        },
        Status::NeedVerify => StatusBadge {
            label: "Waiting for review",
            tone: Tone::Attention,
        },
        Status::Completed => StatusBadge {
            label: "Completed",
            tone: Tone::Success,
        },
        Status::Missed => StatusBadge {
            label: "Missed",
            tone: Tone::Danger,
        },
        Status::Giveup => StatusBadge {
            label: "Given up",
            tone: Tone::Danger,
        },
    }
}

pub fn category_style(category: Category) -> CategoryStyle {
    match category {
        Category::SelfDiscipline => CategoryStyle {
            label: "Self-discipline",
            icon: "target",
            color: "#7c3aed",
        },
        Category::Logic => CategoryStyle {
            label: "Logic",
            icon: "puzzle",
            color: "#2563eb",
        },
        Category::Creativity => CategoryStyle {
            label: "Creativity",
            icon: "palette",
            color: "#db2777",
        },
        Category::Social => CategoryStyle {
            label: "Social",
            icon: "users",
            color: "#ea580c",
        },
        Category::Physical => CategoryStyle {
            label: "Physical",
            icon: "activity",
            color: "#16a34a",
        },
        Category::Academic => CategoryStyle {
            label: "Academic",
            icon: "book",
            color: "#0891b2",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_status_has_a_label() {
        for status in Status::ALL {
            assert!(!status_badge(status).label.is_empty());
        }
    }

    #[test]
    fn category_colors_are_hex() {
        for category in Category::ALL {
            let style = category_style(category);
            assert!(style.color.starts_with('#') && style.color.len() == 7);
        }
    }
}
