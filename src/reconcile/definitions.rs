//! Loading query reference set definitions
//!
//! Every member of the query specification refset is one definition: the
//! referenced component is the reference set, the `query` additional field is
//! its ECL.

use tracing::{info, warn};

use super::types::SetDefinition;
use crate::error::StoreError;
use crate::snowstorm::{MemberQuery, TerminologyStore};

const QUERY_FIELD: &str = "query";

/// Page through the active members of `query_refset_id`
pub async fn load_definitions(
    store: &dyn TerminologyStore,
    query_refset_id: &str,
    page_size: u64,
) -> Result<Vec<SetDefinition>, StoreError> {
    let mut definitions = Vec::new();
    let mut offset = 0;

    loop {
        let query = MemberQuery::for_set(query_refset_id)
            .active(true)
            .page(offset, page_size);
        let page = store.find_members(&query).await?;
        let fetched = page.items.len() as u64;

        for member in page.items {
            let Some(expression) = member.additional_fields.get(QUERY_FIELD) else {
                warn!(
                    member_id = %member.member_id,
                    set_id = %member.referenced_component_id,
                    "query specification member has no query field, skipping"
                );
                continue;
            };
            definitions.push(SetDefinition {
                id: member.referenced_component_id.clone(),
                module_id: member.module_id.clone(),
                expression: expression.trim().to_string(),
                term: member.referenced_component.as_ref().and_then(|c| c.title()),
            });
        }

        offset += fetched;
        if fetched == 0 || offset >= page.total {
            break;
        }
    }

    info!(count = definitions.len(), "Loaded query reference set definitions");
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snowstorm::memory::InMemoryStore;

    #[tokio::test]
    async fn test_loads_all_pages() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.add_definition(
                "900000000000513000",
                &format!("92936006100003610{}", i),
                "<< 404684003",
            );
        }
        store.add_member("900000000000513000", "123456789", true); // no query field

        let defs = load_definitions(&store, "900000000000513000", 2).await.unwrap();
        assert_eq!(defs.len(), 5);
        assert_eq!(defs[0].id, "929360061000036100");
        assert_eq!(defs[0].expression, "<< 404684003");
        assert_eq!(defs[0].term.as_deref(), None);
    }
}
