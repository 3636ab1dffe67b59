//! Turns stored versions and references into parsed schemas the
//! compatibility checker can compare.

use crate::compat::{CompatibilityChecker, ParsedSchema, ResolvedReference};
use crate::error::{RegistryError, RegistryResult};
use crate::store::{SchemaStore, SchemaVersion};
use crate::types::{CompatibilityMode, SchemaReference, SchemaType, Version, VersionSpec};

pub(crate) struct Resolver<'a> {
    store: &'a SchemaStore,
    /// Mode referenced schemas are re-checked under.
    mode: CompatibilityMode,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a SchemaStore, mode: CompatibilityMode) -> Self {
        Self { store, mode }
    }

    /// Parse a candidate schema with its references resolved.
    pub fn parse_candidate(
        &self,
        schema_type: SchemaType,
        schema: &str,
        references: &[SchemaReference],
    ) -> RegistryResult<ParsedSchema> {
        let resolved = self.resolve(references, &mut Vec::new())?;
        ParsedSchema::parse(schema_type, schema, &resolved)
            .map_err(|e| RegistryError::InvalidSchema(e.to_string()))
    }

    /// Live versions of `subject`, oldest first, parsed.
    ///
    /// A stored version that no longer parses is left out of the checks.
    pub fn existing(&self, subject: &str) -> RegistryResult<Vec<ParsedSchema>> {
        self.existing_before(subject, None)
    }

    fn existing_before(&self, subject: &str, below: Option<Version>) -> RegistryResult<Vec<ParsedSchema>> {
        let mut parsed = Vec::new();
        for version in self.store.live_versions(subject)? {
            if below.map(|b| version.version >= b).unwrap_or(false) {
                continue;
            }
            match self.parse_stored(&version, &mut Vec::new()) {
                Ok(schema) => parsed.push(schema),
                Err(err) => tracing::warn!(
                    subject = %subject,
                    version = version.version,
                    error = %err,
                    "stored schema cannot be parsed, left out of compatibility checks"
                ),
            }
        }
        Ok(parsed)
    }

    fn parse_stored(
        &self,
        version: &SchemaVersion,
        chain: &mut Vec<(String, Version)>,
    ) -> RegistryResult<ParsedSchema> {
        let resolved = self.resolve(&version.references, chain)?;
        ParsedSchema::parse(version.schema_type, &version.schema, &resolved)
            .map_err(|e| RegistryError::InvalidSchema(e.to_string()))
    }

    /// Resolve references depth-first. `chain` holds the versions being
    /// resolved above this one, to reject cycles.
    fn resolve(
        &self,
        references: &[SchemaReference],
        chain: &mut Vec<(String, Version)>,
    ) -> RegistryResult<Vec<ResolvedReference>> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            let unknown = |reason: String| RegistryError::UnknownReference {
                reference: reference.clone(),
                reason,
            };

            let key = (reference.subject.clone(), reference.version);
            if chain.contains(&key) {
                return Err(unknown("reference cycle".to_string()));
            }
            let target = self
                .store
                .lookup(&reference.subject, VersionSpec::Number(reference.version))
                .map_err(|e| unknown(e.to_string()))?;

            chain.push(key);
            let parsed = self.parse_stored(&target, chain);
            chain.pop();
            let parsed = parsed.map_err(|e| match e {
                nested @ RegistryError::UnknownReference { .. } => nested,
                other => unknown(other.to_string()),
            })?;

            let earlier = self.existing_before(&reference.subject, Some(reference.version))?;
            let verdict = CompatibilityChecker::check(self.mode, &parsed, &earlier);
            if !verdict.is_compatible() {
                let reasons: Vec<String> = verdict.reasons().iter().map(|r| r.to_string()).collect();
                return Err(unknown(format!(
                    "fails {} check against earlier versions of {}: {}",
                    self.mode,
                    reference.subject,
                    reasons.join("; ")
                )));
            }

            resolved.push(ResolvedReference::new(reference.name.clone(), parsed));
        }
        Ok(resolved)
    }
}
