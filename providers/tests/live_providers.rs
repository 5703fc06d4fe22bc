//! Integration tests that call real provider APIs.
//!
//! These need API keys in the environment (or a .env file).
//! Run with: `cargo test -p providers --test live_providers -- --ignored`

use providers::{
    GenerationParams, ImageProvider, ImageStyle, PollinationsProvider, Prompt, ProviderKeys,
    ProviderRegistry,
};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

#[tokio::test]
#[ignore]
async fn test_every_keyed_text_provider_answers() {
    setup();
    let registry = ProviderRegistry::from_keys(&ProviderKeys::from_env());
    let prompt = Prompt::new("Reply with one short sentence about a lighthouse.")
        .with_system("You are terse.");
    let params = GenerationParams::default().with_max_tokens(64);

    for name in registry.text_names().collect::<Vec<_>>() {
        let provider = registry.text(name).unwrap();
        match provider.generate(&prompt, &params).await {
            Ok(generation) => {
                println!("{name} ({}): {}", generation.model, generation.content);
                assert!(!generation.content.trim().is_empty());
            }
            Err(e) => eprintln!("{name} failed: {e}"),
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_pollinations_returns_image_bytes() {
    setup();
    let provider = PollinationsProvider::new();
    let image = provider
        .generate("a lighthouse at dusk, watercolor", &ImageStyle::default())
        .await
        .expect("pollinations should answer");

    assert_eq!(image.model, provider.default_model());
    assert!(image.bytes.len() > 1024);
}
