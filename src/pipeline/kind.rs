//! Asset kinds and the requests that name them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The five kinds of derived asset, each backed by its own pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    /// Scene illustration for a chapter (image backend).
    Illustration,
    /// Character portrait (image backend).
    Portrait,
    /// Character discovery and analysis for a chapter (LLM).
    ChapterAnalysis,
    /// "Previously on" recap of a chapter (LLM).
    Recap,
    /// Comprehension quiz for a chapter (LLM).
    Quiz,
}

/// What an asset kind is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Chapter,
    Character,
}

impl AssetKind {
    /// All kinds, in the order pipelines are started.
    pub const ALL: [AssetKind; 5] = [
        AssetKind::Illustration,
        AssetKind::Portrait,
        AssetKind::ChapterAnalysis,
        AssetKind::Recap,
        AssetKind::Quiz,
    ];

    /// Stable identifier used in the `kind` column and in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Illustration => "illustration",
            AssetKind::Portrait => "portrait",
            AssetKind::ChapterAnalysis => "chapter-analysis",
            AssetKind::Recap => "recap",
            AssetKind::Quiz => "quiz",
        }
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            AssetKind::Portrait => TargetType::Character,
            _ => TargetType::Chapter,
        }
    }

    /// Whether the asset is an image file rather than a JSON payload.
    pub fn is_image(&self) -> bool {
        matches!(self, AssetKind::Illustration | AssetKind::Portrait)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "illustration" => Ok(AssetKind::Illustration),
            "portrait" => Ok(AssetKind::Portrait),
            "chapter-analysis" | "analysis" => Ok(AssetKind::ChapterAnalysis),
            "recap" => Ok(AssetKind::Recap),
            "quiz" => Ok(AssetKind::Quiz),
            other => Err(format!("unknown asset kind '{}'", other)),
        }
    }
}

/// A request for one asset, tagged with the kind that should produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target_id", rename_all = "kebab-case")]
pub enum AssetRequest {
    Illustration(i64),
    Portrait(i64),
    ChapterAnalysis(i64),
    Recap(i64),
    Quiz(i64),
}

impl AssetRequest {
    /// Builds a request from a kind and a target id.
    pub fn new(kind: AssetKind, target_id: i64) -> Self {
        match kind {
            AssetKind::Illustration => AssetRequest::Illustration(target_id),
            AssetKind::Portrait => AssetRequest::Portrait(target_id),
            AssetKind::ChapterAnalysis => AssetRequest::ChapterAnalysis(target_id),
            AssetKind::Recap => AssetRequest::Recap(target_id),
            AssetKind::Quiz => AssetRequest::Quiz(target_id),
        }
    }

    pub fn kind(&self) -> AssetKind {
        match self {
            AssetRequest::Illustration(_) => AssetKind::Illustration,
            AssetRequest::Portrait(_) => AssetKind::Portrait,
            AssetRequest::ChapterAnalysis(_) => AssetKind::ChapterAnalysis,
            AssetRequest::Recap(_) => AssetKind::Recap,
            AssetRequest::Quiz(_) => AssetKind::Quiz,
        }
    }

    pub fn target_id(&self) -> i64 {
        match *self {
            AssetRequest::Illustration(id)
            | AssetRequest::Portrait(id)
            | AssetRequest::ChapterAnalysis(id)
            | AssetRequest::Recap(id)
            | AssetRequest::Quiz(id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_accepts_aliases() {
        assert_eq!("recap".parse::<AssetKind>(), Ok(AssetKind::Recap));
        assert_eq!(
            "chapter_analysis".parse::<AssetKind>(),
            Ok(AssetKind::ChapterAnalysis)
        );
        assert_eq!(" Portrait ".parse::<AssetKind>(), Ok(AssetKind::Portrait));
        assert!("poster".parse::<AssetKind>().is_err());
    }

    #[test]
    fn test_kind_str_roundtrip() {
        for kind in AssetKind::ALL {
            assert_eq!(kind.as_str().parse::<AssetKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_only_portraits_target_characters() {
        let character_kinds: Vec<_> = AssetKind::ALL
            .iter()
            .filter(|k| k.target_type() == TargetType::Character)
            .collect();
        assert_eq!(character_kinds, vec![&AssetKind::Portrait]);
    }

    #[test]
    fn test_request_carries_kind_and_target() {
        let request = AssetRequest::new(AssetKind::Quiz, 9);
        assert_eq!(request, AssetRequest::Quiz(9));
        assert_eq!(request.kind(), AssetKind::Quiz);
        assert_eq!(request.target_id(), 9);

        let json = serde_json::to_value(AssetRequest::ChapterAnalysis(3)).unwrap();
        assert_eq!(json["kind"], "chapter-analysis");
        assert_eq!(json["target_id"], 3);
    }
}
