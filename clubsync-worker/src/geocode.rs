use serde_json::Value;

/// Address -> coordinates enrichment on insert (Person / Organization
/// only). Geocoding itself is an external collaborator (§1, out of
/// scope); this crate only depends on the trait so the apply path can
/// call it without caring which provider is wired in.
pub trait Geocoder: Send + Sync {
    /// Given an entity's JSON body, return the fields to merge in
    /// (typically `latitude`/`longitude`), or `None` if the body has no
    /// enrichable address or the provider couldn't resolve one.
    fn enrich(&self, entity: &Value) -> Option<Value>;
}

/// Used whenever `geocode_enabled` is false, or in tests.
pub struct NoopGeocoder;

impl Geocoder for NoopGeocoder {
    fn enrich(&self, _entity: &Value) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_geocoder_never_enriches() {
        let geocoder = NoopGeocoder;
        assert!(geocoder.enrich(&serde_json::json!({"address": "x"})).is_none());
    }
}
