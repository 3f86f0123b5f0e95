//! `config show [category]` (C8/C12): dumps the resolved configuration
//! (runtime overrides -> environment -> defaults) for operational
//! debugging, without starting the pipeline.

use anyhow::Result;

use super::{default_registry, KNOWN_CATEGORIES};

pub async fn handle_config_show(category: Option<&str>) -> Result<()> {
    let registry = default_registry();

    let categories: Vec<&str> = match category {
        Some(c) => vec![c],
        None => KNOWN_CATEGORIES.to_vec(),
    };

    for category in categories {
        println!("[{category}]");
        let mut resolved: Vec<_> = registry.get_category(category).await.into_iter().collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in resolved {
            println!("  {key} = {value:?}");
        }
    }
    Ok(())
}
