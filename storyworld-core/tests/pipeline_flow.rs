//! End-to-end chapter generation against scripted providers.
//!
//! Covers the pipeline stages, continuity bookkeeping, image caching,
//! rerolls, reader choices and administrative deletion.

use storyworld_core::choices::fallback_reasoning;
use storyworld_core::world::WorldError;
use storyworld_core::{
    ChoiceSelection, EntityId, GenerationError, GenerationRequest, JobOutcome, ReasoningSource,
    ScriptedChapter, TestHarness, WorldSlug,
};
use tempfile::TempDir;

fn id(raw: &str) -> EntityId {
    EntityId::normalize(raw).unwrap()
}

fn text_only(slug: &WorldSlug) -> GenerationRequest {
    GenerationRequest::new(slug.clone()).with_image(false)
}

async fn generate(h: &TestHarness, slug: &WorldSlug, chapter: ScriptedChapter) -> storyworld_core::GeneratedChapter {
    h.expect_chapter(chapter);
    h.engine
        .generate_and_wait(text_only(slug))
        .await
        .expect("generation should succeed")
}

// =============================================================================
// NUMBERING AND CONTINUITY
// =============================================================================

#[tokio::test]
async fn test_chapters_are_numbered_without_gaps() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    for n in 1..=3u32 {
        let generated = generate(&h, &slug, ScriptedChapter::new(format!("Fog {n}"))).await;
        assert_eq!(generated.chapter.number, n);
        assert!(generated.warnings.is_empty(), "{:?}", generated.warnings);
    }

    let state = h.state(&slug).await.unwrap();
    let numbers: Vec<u32> = state.chapters.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(state.tick, 3);

    let markdown = h.engine.chapter_markdown(&slug, 2).await.unwrap();
    assert!(markdown.starts_with("<!-- {"));
    assert!(markdown.contains("# Fog 2"));
    assert_eq!(state.chapters[1].title, "Fog 2");
    assert_eq!(state.chapters[1].text_model.as_deref(), Some("scripted-text"));
}

#[tokio::test]
async fn test_scene_lists_only_resolve_to_known_entities() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    generate(
        &h,
        &slug,
        ScriptedChapter::new("Arrival")
            .with_character("Wren", "Wren", "A ferry pilot")
            .with_location("old-pier", "The Old Pier", "Rotting boards"),
    )
    .await;

    // Re-introducing Wren refines her; the ghost ship was never introduced.
    let second = generate(
        &h,
        &slug,
        ScriptedChapter::new("Night Crossing")
            .with_character("wren", "Captain Wren", "A ferry pilot with a scar")
            .featuring("ghost-ship"),
    )
    .await;
    assert_eq!(second.chapter.meta.entities_in_scene, vec![id("wren")]);

    let state = h.state(&slug).await.unwrap();
    let wren = state.entity(&id("wren")).unwrap();
    assert_eq!(wren.name, "Wren");
    assert_eq!(wren.description, "A ferry pilot with a scar");
    assert_eq!(wren.first_appearance, 1);
    assert!(!state.contains_entity(&id("ghost-ship")));

    for chapter in &state.chapters {
        for scene_id in &chapter.meta.entities_in_scene {
            let entity = state.entity(scene_id).expect("scene id must resolve");
            assert!(entity.first_appearance <= chapter.number);
        }
    }
}

#[tokio::test]
async fn test_noir_context_carries_memory_history_and_focus_last() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let config = TestHarness::world_config("Rain City")
        .unwrap()
        .with_preset("noir-mystery")
        .with_memory("X");
    let slug = h.create_world_with(config).await.unwrap();

    for (title, summary) in [
        ("The Client", "A widow hires the detective."),
        ("The Ledger", "A ledger goes missing from the bank."),
        ("The Tip", "An informant mentions the docks."),
    ] {
        generate(&h, &slug, ScriptedChapter::new(title).with_summary(summary)).await;
    }

    h.expect_chapter(ScriptedChapter::new("The Docks"));
    let fourth = h
        .engine
        .generate_and_wait(text_only(&slug).with_focus("detective enters docks"))
        .await
        .unwrap();
    assert_eq!(fourth.chapter.number, 4);

    let prompts = h.text.prompts();
    let user = &prompts[3].user;
    let noir = storyworld_core::presets::preset("noir-mystery").unwrap();

    assert!(user.contains("Memory/Lore:\nX"));
    assert!(user.contains(noir.system_directives));
    let first = user.find("A widow hires the detective.").unwrap();
    let second = user.find("A ledger goes missing from the bank.").unwrap();
    let third = user.find("An informant mentions the docks.").unwrap();
    assert!(first < second && second < third);
    assert!(user
        .trim_end()
        .ends_with("FOCUS FOR THIS CHAPTER: detective enters docks"));
}

// =============================================================================
// DEGRADED STAGES
// =============================================================================

#[tokio::test]
async fn test_image_failure_is_a_warning_in_the_terminal_event() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    h.images.set_failing(true);
    h.expect_chapter(ScriptedChapter::new("Lanterns"));

    let job = h
        .engine
        .start_generation(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    let outcome = h.engine.subscribe(job).unwrap().wait().await;

    let Some(JobOutcome::Completed(generated)) = &outcome else {
        panic!("expected a completed job, got {outcome:?}");
    };
    assert!(generated.chapter.image.is_none());
    assert!(generated
        .warnings
        .iter()
        .any(|w| w.starts_with("Scene image failed")));

    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.chapters.len(), 1);
    assert!(state.chapters[0].image.is_none());
}

#[tokio::test]
async fn test_corrupt_image_index_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    let index = h.engine.store().world_dir(&slug).join("media/index.json");
    std::fs::create_dir_all(index.parent().unwrap()).unwrap();
    std::fs::write(&index, "{garbage").unwrap();

    h.expect_chapter(ScriptedChapter::new("Lanterns").with_scene_prompt("A lighthouse in fog"));
    let generated = h
        .engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    assert!(generated
        .warnings
        .iter()
        .any(|w| w.starts_with("Image cache could not be read")));
    assert!(generated.chapter.image.is_some());

    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.chapters.len(), 1);

    // The rebuilt index serves the next identical prompt.
    h.expect_chapter(ScriptedChapter::new("Fog Again").with_scene_prompt("A lighthouse in fog"));
    let again = h
        .engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    assert!(again.warnings.is_empty(), "{:?}", again.warnings);
    assert_eq!(h.images.calls(), 1);
}

#[tokio::test]
async fn test_malformed_metadata_still_persists_prose() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    h.text.push_reply(
        "<!-- {\"scene_prompt\": \"x\",} -->\n\n# Broken Glass\n\nThe prose survives the storm.\n",
    );

    let generated = h.engine.generate_and_wait(text_only(&slug)).await.unwrap();
    assert_eq!(generated.chapter.title, "Broken Glass");
    assert!(generated.chapter.meta.is_empty());
    assert!(generated
        .warnings
        .iter()
        .any(|w| w.starts_with("Continuity extraction failed")));

    let markdown = h.engine.chapter_markdown(&slug, 1).await.unwrap();
    assert!(markdown.contains("The prose survives the storm."));
    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.entity_count(), 0);
}

#[tokio::test]
async fn test_provider_failure_leaves_world_untouched() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    generate(&h, &slug, ScriptedChapter::new("One")).await;
    let before = h.state(&slug).await.unwrap();

    h.text
        .push_error(providers::ProviderError::auth("scripted", "key revoked"));
    let err = h.engine.generate_and_wait(text_only(&slug)).await.unwrap_err();
    assert!(err.is_provider());

    assert_eq!(h.state(&slug).await.unwrap(), before);
    assert!(!h.engine.is_generating(&slug));
}

// =============================================================================
// IMAGE CACHE
// =============================================================================

#[tokio::test]
async fn test_identical_scene_prompts_reuse_cached_image() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    for title in ["First Light", "Second Light"] {
        h.expect_chapter(ScriptedChapter::new(title).with_scene_prompt("A lighthouse in fog"));
        h.engine
            .generate_and_wait(GenerationRequest::new(slug.clone()))
            .await
            .unwrap();
    }
    assert_eq!(h.images.calls(), 1);

    let state = h.state(&slug).await.unwrap();
    let first = state.chapters[0].image.clone().unwrap();
    let second = state.chapters[1].image.clone().unwrap();
    assert_eq!(first.path, second.path);
    assert_eq!(first.cache_key, second.cache_key);
    assert!(first.path.starts_with("media/scenes/"));
}

#[tokio::test]
async fn test_regenerate_image_bypasses_cache() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    h.expect_chapter(ScriptedChapter::new("First Light").with_scene_prompt("A lighthouse in fog"));
    h.engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    let original = h.state(&slug).await.unwrap().chapters[0].image.clone().unwrap();

    let fresh = h.engine.regenerate_image(&slug, 1).await.unwrap();
    assert_eq!(h.images.calls(), 2);
    assert_ne!(fresh.path, original.path);
    assert_eq!(fresh.cache_key, original.cache_key);

    let world_dir = h.engine.store().world_dir(&slug);
    let old_bytes = std::fs::read(world_dir.join(&original.path)).unwrap();
    let new_bytes = std::fs::read(world_dir.join(&fresh.path)).unwrap();
    assert_ne!(old_bytes, new_bytes);

    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.chapters[0].image.as_ref().unwrap().path, fresh.path);

    // The next identical prompt is served from the new file.
    h.expect_chapter(ScriptedChapter::new("Second Light").with_scene_prompt("A lighthouse in fog"));
    let next = h
        .engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    assert_eq!(next.chapter.image.unwrap().path, fresh.path);
    assert_eq!(h.images.calls(), 2);
}

#[tokio::test]
async fn test_regenerate_image_needs_a_scene_prompt() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    h.text.push_reply("# No Metadata\n\nJust prose.");
    h.engine.generate_and_wait(text_only(&slug)).await.unwrap();

    let err = h.engine.regenerate_image(&slug, 1).await.unwrap_err();
    assert!(matches!(err, GenerationError::NoScenePrompt(1)));
    let err = h.engine.regenerate_image(&slug, 9).await.unwrap_err();
    assert!(matches!(err, GenerationError::ChapterNotFound(9)));
}

// =============================================================================
// REROLL
// =============================================================================

#[tokio::test]
async fn test_reroll_replaces_chapter_in_place() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    generate(
        &h,
        &slug,
        ScriptedChapter::new("Arrival")
            .with_summary("Wren docks at dusk.")
            .with_character("wren", "Wren", "A ferry pilot"),
    )
    .await;
    generate(
        &h,
        &slug,
        ScriptedChapter::new("The Lamp")
            .with_summary("Wren finds a brass lamp.")
            .with_item("brass-lamp", "Brass Lamp", "Dented, still warm"),
    )
    .await;
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Departure")
            .with_summary("The ferry leaves without her.")
            .featuring("wren"),
    )
    .await;
    let before = h.state(&slug).await.unwrap();

    h.expect_chapter(
        ScriptedChapter::new("The Compass")
            .with_item("compass", "Compass", "Points toward the drowned bell")
            .featuring("wren"),
    );
    let rerolled = h.engine.reroll_and_wait(text_only(&slug), 2).await.unwrap();
    assert!(rerolled.rerolled);
    assert_eq!(rerolled.chapter.number, 2);

    let after = h.state(&slug).await.unwrap();
    let numbers: Vec<u32> = after.chapters.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(after.tick, before.tick + 1);
    assert_eq!(after.chapters[1].title, "The Compass");
    assert_eq!(after.chapters[0], before.chapters[0]);
    assert_eq!(after.chapters[2], before.chapters[2]);
    assert!(!after.contains_entity(&id("brass-lamp")));
    assert_eq!(after.entity(&id("compass")).unwrap().first_appearance, 2);

    // The replacement was written from the world as it stood before chapter 2.
    let user = &h.text.prompts()[3].user;
    assert!(user.contains("Wren docks at dusk."));
    assert!(!user.contains("Wren finds a brass lamp."));
    assert!(!user.contains("The ferry leaves without her."));

    let markdown = h.engine.chapter_markdown(&slug, 2).await.unwrap();
    assert!(markdown.contains("# The Compass"));
}

#[tokio::test]
async fn test_reroll_context_ignores_descriptions_from_later_chapters() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    generate(
        &h,
        &slug,
        ScriptedChapter::new("Arrival").with_character("wren", "Wren", "A ferry pilot"),
    )
    .await;
    generate(
        &h,
        &slug,
        ScriptedChapter::new("The Fire").with_character("wren", "Wren", "Burned across the left hand"),
    )
    .await;
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Healing").with_character("wren", "Wren", "Walks with a cane now"),
    )
    .await;

    h.expect_chapter(ScriptedChapter::new("The Fire, Again").featuring("wren"));
    h.engine.reroll_and_wait(text_only(&slug), 2).await.unwrap();

    let user = &h.text.prompts()[3].user;
    assert!(user.contains("A ferry pilot"));
    assert!(!user.contains("Burned across the left hand"));
    assert!(!user.contains("Walks with a cane now"));
}

#[tokio::test]
async fn test_reroll_keeps_committed_choice() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let config = TestHarness::world_config("Harbor Lights")
        .unwrap()
        .with_choices(true);
    let slug = h.create_world_with(config).await.unwrap();

    generate(
        &h,
        &slug,
        ScriptedChapter::new("Crossroads")
            .with_choice("bell", "Follow the bell")
            .with_choice("shore", "Stay ashore"),
    )
    .await;
    h.engine
        .select_choice(
            &slug,
            1,
            ChoiceSelection::Id("bell".into()),
            ReasoningSource::None,
        )
        .await
        .unwrap();

    h.expect_chapter(ScriptedChapter::new("Crossroads Again").with_choice("sea", "Swim"));
    let rerolled = h.engine.reroll_and_wait(text_only(&slug), 1).await.unwrap();
    assert_eq!(rerolled.chapter.selected_choice_id.as_deref(), Some("bell"));
    let ids: Vec<&str> = rerolled
        .chapter
        .meta
        .choices
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["bell", "shore"]);
}

#[tokio::test]
async fn test_reroll_of_missing_chapter_fails() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();

    let err = h
        .engine
        .start_reroll(text_only(&slug), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::ChapterNotFound(1)));
    assert_eq!(h.text.calls(), 0);
}

// =============================================================================
// CHOICES
// =============================================================================

#[tokio::test]
async fn test_choice_selection_is_one_way() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let config = TestHarness::world_config("Harbor Lights")
        .unwrap()
        .with_choices(true);
    let slug = h.create_world_with(config).await.unwrap();
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Crossroads")
            .with_choice("bell", "Follow the bell")
            .with_choice("shore", "Stay ashore"),
    )
    .await;

    let err = h
        .engine
        .select_choice(&slug, 1, ChoiceSelection::Id("sky".into()), ReasoningSource::None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GenerationError::World(WorldError::UnknownChoice { chapter: 1, .. })
    ));

    let selected = h
        .engine
        .select_choice(
            &slug,
            1,
            ChoiceSelection::Id("shore".into()),
            ReasoningSource::Provided("Safer".into()),
        )
        .await
        .unwrap();
    assert_eq!(selected.choice.id, "shore");

    let err = h
        .engine
        .select_choice(&slug, 1, ChoiceSelection::Id("bell".into()), ReasoningSource::None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GenerationError::World(WorldError::ChoiceAlreadySelected { .. })
    ));

    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.chapters[0].selected_choice_id.as_deref(), Some("shore"));
    assert_eq!(state.chapters[0].choice_reasoning.as_deref(), Some("Safer"));

    // The next chapter is steered by the pick.
    h.expect_chapter(ScriptedChapter::new("Ashore"));
    h.engine.generate_and_wait(text_only(&slug)).await.unwrap();
    let user = &h.text.prompts()[1].user;
    assert!(user.contains("READER'S CHOICE (PRIMARY DIRECTIVE): Stay ashore"));
    assert!(user.contains("Reader's intent: Safer"));
}

#[tokio::test]
async fn test_inferred_reasoning_falls_back_when_provider_fails() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let config = TestHarness::world_config("Harbor Lights")
        .unwrap()
        .with_choices(true);
    let slug = h.create_world_with(config).await.unwrap();
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Crossroads").with_choice("bell", "Follow The Bell"),
    )
    .await;

    // No scripted reply is queued, so inference fails.
    let selected = h
        .engine
        .select_choice(&slug, 1, ChoiceSelection::Auto, ReasoningSource::Infer)
        .await
        .unwrap();
    assert_eq!(selected.choice.id, "bell");
    assert_eq!(
        selected.reasoning.as_deref(),
        Some(fallback_reasoning(&selected.choice).as_str())
    );
}

#[tokio::test]
async fn test_open_choice_is_auto_selected_before_next_chapter() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let config = TestHarness::world_config("Harbor Lights")
        .unwrap()
        .with_choices(true);
    let slug = h.create_world_with(config).await.unwrap();
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Crossroads")
            .with_choice("bell", "Follow the bell")
            .with_choice("shore", "Stay ashore"),
    )
    .await;

    generate(&h, &slug, ScriptedChapter::new("Onward")).await;

    let state = h.state(&slug).await.unwrap();
    let picked = state.chapters[0].selected_choice().expect("choice auto-selected");
    assert!(picked.id == "bell" || picked.id == "shore");
    assert!(state.chapters[0].choice_reasoning.is_none());
    assert!(h.text.prompts()[1]
        .user
        .contains(&format!("READER'S CHOICE (PRIMARY DIRECTIVE): {}", picked.text)));
}

#[tokio::test]
async fn test_choices_dropped_when_disabled() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    let generated = generate(
        &h,
        &slug,
        ScriptedChapter::new("Crossroads").with_choice("bell", "Follow the bell"),
    )
    .await;
    assert!(generated.chapter.meta.choices.is_empty());

    let err = h
        .engine
        .select_choice(&slug, 1, ChoiceSelection::Auto, ReasoningSource::None)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::World(WorldError::NoChoices(1))));
}

// =============================================================================
// ADMINISTRATION
// =============================================================================

#[tokio::test]
async fn test_delete_latest_chapter_records_audit() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    generate(
        &h,
        &slug,
        ScriptedChapter::new("Arrival").with_character("wren", "Wren", "A ferry pilot"),
    )
    .await;
    h.expect_chapter(
        ScriptedChapter::new("Mistake")
            .with_scene_prompt("A bad scene")
            .with_item("cursed-coin", "Cursed Coin", "")
            .featuring("wren"),
    );
    let mistake = h
        .engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    let image_path = mistake.chapter.image.unwrap().path;
    let world_dir = h.engine.store().world_dir(&slug);
    assert!(world_dir.join(&image_path).exists());

    let record = h
        .engine
        .delete_latest_chapter(&slug, "off-tone chapter")
        .await
        .unwrap();
    assert_eq!(record.chapter, 2);
    assert_eq!(record.title, "Mistake");
    assert_eq!(record.removed_entities, vec![id("cursed-coin")]);

    let state = h.state(&slug).await.unwrap();
    assert_eq!(state.chapters.len(), 1);
    assert_eq!(state.audit_log, vec![record]);
    assert!(state.contains_entity(&id("wren")));
    assert!(!world_dir.join(&image_path).exists());
    assert!(matches!(
        h.engine.chapter_markdown(&slug, 2).await,
        Err(GenerationError::ChapterNotFound(2))
    ));

    // Numbering continues from the surviving chapter.
    let next = generate(&h, &slug, ScriptedChapter::new("Second Try")).await;
    assert_eq!(next.chapter.number, 2);
}

#[tokio::test]
async fn test_delete_latest_keeps_image_shared_with_earlier_chapter() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let slug = h.create_world("Harbor Lights").await.unwrap();
    for title in ["Fog", "More Fog"] {
        h.expect_chapter(ScriptedChapter::new(title).with_scene_prompt("A lighthouse in fog"));
        h.engine
            .generate_and_wait(GenerationRequest::new(slug.clone()))
            .await
            .unwrap();
    }
    let state = h.state(&slug).await.unwrap();
    let shared = state.chapters[0].image.clone().unwrap().path;
    assert_eq!(state.chapters[1].image.as_ref().unwrap().path, shared);
    assert_eq!(h.images.calls(), 1);

    h.engine
        .delete_latest_chapter(&slug, "duplicate")
        .await
        .unwrap();
    assert!(h.engine.store().world_dir(&slug).join(&shared).exists());

    // The cache entry survives too.
    h.expect_chapter(ScriptedChapter::new("Fog Once More").with_scene_prompt("A lighthouse in fog"));
    let next = h
        .engine
        .generate_and_wait(GenerationRequest::new(slug.clone()))
        .await
        .unwrap();
    assert_eq!(next.chapter.image.unwrap().path, shared);
    assert_eq!(h.images.calls(), 1);
}

#[tokio::test]
async fn test_delete_latest_on_unknown_world() {
    let dir = TempDir::new().unwrap();
    let h = TestHarness::new(dir.path());
    let ghost = WorldSlug::parse("ghost-town").unwrap();
    assert!(matches!(
        h.engine.delete_latest_chapter(&ghost, "cleanup").await,
        Err(GenerationError::WorldNotFound(_))
    ));
    assert!(matches!(
        h.engine.start_reroll(text_only(&ghost), 1).await,
        Err(GenerationError::WorldNotFound(ref s)) if *s == ghost
    ));
}
