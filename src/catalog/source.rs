use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use anyhow::Context as _;

use crate::{
    catalog::model::{MediaDescriptor, MetadataDocument, OriginKind, SourcePriority},
    foundation::core::Token,
    foundation::error::{ReelError, ReelResult},
};

/// Builder input for one candidate source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    pub origin_id: String,
    pub origin_kind: OriginKind,
    pub locator: String,
    pub source_rank: u32,
}

impl SourceSpec {
    pub fn new(
        origin_id: impl Into<String>,
        origin_kind: OriginKind,
        locator: impl Into<String>,
        source_rank: u32,
    ) -> Self {
        Self {
            origin_id: origin_id.into(),
            origin_kind,
            locator: locator.into(),
            source_rank,
        }
    }
}

/// Accumulates metadata rows before freezing them into a [`SourceCatalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    rows: BTreeMap<Token, Vec<SourceSpec>>,
    aliases: Vec<(Token, Token)>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `token` with no sources yet. Such a token exists but has nothing to resolve.
    pub fn token(&mut self, token: &str) -> ReelResult<&mut Self> {
        self.rows.entry(Token::new(token)?).or_default();
        Ok(self)
    }

    /// Add one candidate source to `token` (rows for the same token merge).
    pub fn source(&mut self, token: &str, spec: SourceSpec) -> ReelResult<&mut Self> {
        if spec.origin_id.trim().is_empty() {
            return Err(ReelError::catalog(format!(
                "token '{token}' has a source with an empty origin_id"
            )));
        }
        if spec.locator.trim().is_empty() {
            return Err(ReelError::catalog(format!(
                "origin '{}' has an empty locator",
                spec.origin_id
            )));
        }
        self.rows.entry(Token::new(token)?).or_default().push(spec);
        Ok(self)
    }

    /// Make `alias` share the descriptor set of `canonical`.
    pub fn alias(&mut self, alias: &str, canonical: &str) -> ReelResult<&mut Self> {
        self.aliases.push((Token::new(alias)?, Token::new(canonical)?));
        Ok(self)
    }

    pub fn build(self) -> ReelResult<SourceCatalog> {
        let mut by_token = HashMap::<Token, Arc<[MediaDescriptor]>>::with_capacity(self.rows.len());
        for (token, specs) in self.rows {
            let mut best = BTreeMap::<String, SourceSpec>::new();
            for spec in specs {
                match best.get(&spec.origin_id) {
                    Some(prev) if prev.source_rank <= spec.source_rank => {}
                    _ => {
                        best.insert(spec.origin_id.clone(), spec);
                    }
                }
            }
            let mut descriptors: Vec<MediaDescriptor> = best
                .into_values()
                .map(|s| MediaDescriptor {
                    token: token.clone(),
                    origin_id: s.origin_id,
                    origin_kind: s.origin_kind,
                    source_rank: s.source_rank,
                    locator: s.locator,
                })
                .collect();
            descriptors.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
            by_token.insert(token, descriptors.into());
        }

        for (alias, canonical) in self.aliases {
            let shared = by_token.get(&canonical).cloned().ok_or_else(|| {
                ReelError::catalog(format!(
                    "alias '{alias}' points at unknown token '{canonical}'"
                ))
            })?;
            match by_token.get(&alias) {
                Some(existing) if !Arc::ptr_eq(existing, &shared) && !existing.is_empty() => {
                    return Err(ReelError::catalog(format!(
                        "alias '{alias}' collides with a token that has its own sources"
                    )));
                }
                _ => {
                    by_token.insert(alias, shared);
                }
            }
        }

        let mut vocabulary: Vec<Token> = by_token.keys().cloned().collect();
        vocabulary.sort();
        Ok(SourceCatalog {
            by_token,
            vocabulary,
        })
    }
}

/// Immutable token → ranked candidate index.
#[derive(Clone, Debug)]
pub struct SourceCatalog {
    by_token: HashMap<Token, Arc<[MediaDescriptor]>>,
    vocabulary: Vec<Token>,
}

impl SourceCatalog {
    /// Load a metadata file; both the native table and the dataset layout are accepted.
    pub fn from_path(path: &Path, priority: &SourcePriority) -> ReelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read metadata table '{}'", path.display()))?;
        let catalog = Self::from_json_str(&text, priority)?;
        tracing::info!(
            path = %path.display(),
            tokens = catalog.len(),
            descriptors = catalog.descriptor_count(),
            "loaded source catalog"
        );
        Ok(catalog)
    }

    /// Parse metadata JSON. `priority` ranks dataset instances; native tables carry explicit ranks.
    pub fn from_json_str(text: &str, priority: &SourcePriority) -> ReelResult<Self> {
        let doc: MetadataDocument = serde_json::from_str(text)
            .map_err(|e| ReelError::serde(format!("metadata table: {e}")))?;

        let mut builder = CatalogBuilder::new();
        match doc {
            MetadataDocument::Table(table) => {
                for row in table.entries {
                    builder.token(&row.token)?;
                    for s in row.sources {
                        builder.source(
                            &row.token,
                            SourceSpec::new(s.origin_id, s.origin_kind, s.locator, s.source_rank),
                        )?;
                    }
                    for alias in &row.aliases {
                        builder.alias(alias, &row.token)?;
                    }
                }
            }
            MetadataDocument::Dataset(glosses) => {
                for entry in glosses {
                    builder.token(&entry.gloss)?;
                    for inst in entry.instances {
                        let kind = OriginKind::classify_locator(&inst.url);
                        let rank = priority.rank_of(inst.source.as_deref());
                        builder.source(
                            &entry.gloss,
                            SourceSpec::new(inst.video_id, kind, inst.url, rank),
                        )?;
                    }
                }
            }
        }
        builder.build()
    }

    /// Ranked candidates for `token`; empty when the token is unknown.
    pub fn lookup(&self, token: &str) -> &[MediaDescriptor] {
        match self.get(token) {
            Some(d) => d,
            None => &[],
        }
    }

    pub fn exists(&self, token: &str) -> bool {
        self.get(token).is_some()
    }

    /// Up to `max` vocabulary tokens that look like `token`, closest first.
    ///
    /// Diagnostic only: exact match, then substring matches, then small edit distances.
    pub fn similar(&self, token: &str, max: usize) -> Vec<Token> {
        let needle = token.trim().to_uppercase();
        if needle.is_empty() || max == 0 {
            return Vec::new();
        }
        let threshold = (needle.chars().count() / 3).max(2);

        let mut scored: Vec<(u8, usize, &Token)> = self
            .vocabulary
            .iter()
            .filter_map(|cand| {
                let c = cand.as_str();
                if c == needle {
                    return Some((0, 0, cand));
                }
                let distance = strsim::levenshtein(c, &needle);
                let contains = c.contains(needle.as_str())
                    || (c.chars().count() >= 2 && needle.contains(c));
                if contains {
                    return Some((1, distance, cand));
                }
                (distance <= threshold).then_some((2, distance, cand))
            })
            .collect();
        scored.sort();
        scored
            .into_iter()
            .take(max)
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    /// Sorted vocabulary, aliases included.
    pub fn tokens(&self) -> &[Token] {
        &self.vocabulary
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Distinct descriptors (alias sharing counted once).
    pub fn descriptor_count(&self) -> usize {
        let mut seen = Vec::<*const MediaDescriptor>::new();
        let mut n = 0;
        for set in self.by_token.values() {
            let p = set.as_ptr();
            if set.is_empty() || seen.contains(&p) {
                continue;
            }
            seen.push(p);
            n += set.len();
        }
        n
    }

    fn get(&self, token: &str) -> Option<&Arc<[MediaDescriptor]>> {
        let key = token.trim();
        if let Some(d) = self.by_token.get(key) {
            return Some(d);
        }
        self.by_token.get(key.to_uppercase().as_str())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/catalog/source.rs"]
mod tests;
