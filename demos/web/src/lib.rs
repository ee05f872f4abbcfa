//! SchoolStore browser demo
//!
//! Hydrates the store from IndexedDB (migrating a legacy localStorage blob if
//! one exists), mutates a few collections, and shows what survives a page
//! refresh.

use schoolstate::{
    BrowserSpawner, IdbEngine, LocalStorageLegacy, PersistenceState, RegistrationDraft,
    SchoolStore, StoreConfig,
};
use serde_json::json;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

#[derive(Clone, Copy)]
enum Line {
    Info,
    Done,
    Failed,
}

/// Writes a line to the console and, when the page has one, the `#output` list.
fn say(line: Line, msg: &str) {
    let (class, text) = match line {
        Line::Info => ("log-entry", msg.to_string()),
        Line::Done => ("log-entry", format!("✅ {msg}")),
        Line::Failed => ("log-entry error", format!("❌ {msg}")),
    };
    match line {
        Line::Failed => web_sys::console::error_1(&text.as_str().into()),
        _ => web_sys::console::log_1(&text.as_str().into()),
    }

    let Some(document) = web_sys::window().and_then(|window| window.document()) else {
        return;
    };
    let (Some(output), Ok(entry)) = (
        document.get_element_by_id("output"),
        document.create_element("div"),
    ) else {
        return;
    };
    entry.set_class_name(class);
    entry.set_text_content(Some(&text));
    let _ = output.append_child(&entry);
}

/// Wait for a browser tick so fire-and-forget writes can land
async fn next_tick() {
    gloo_timers::future::TimeoutFuture::new(50).await;
}

/// Main entry point - runs the demo
#[wasm_bindgen(start)]
pub async fn main() {
    console_error_panic_hook::set_once();

    say(Line::Info, "🏫 SchoolStore Demo");
    say(Line::Info, "===================");
    say(Line::Info, "");

    if let Err(e) = run_demo().await {
        say(Line::Failed, &format!("Demo failed: {:?}", e));
    }
}

async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    // =========================================================================
    // Step 1: Hydrate
    // =========================================================================
    say(Line::Info, "📦 Hydrating store...");

    let config = StoreConfig {
        database_name: "schoolstate-demo".to_string(),
        ..StoreConfig::default()
    };
    let engine = IdbEngine::from_config(&config);
    let store = SchoolStore::init(config, engine, &LocalStorageLegacy::new(), Rc::new(BrowserSpawner)).await;

    match store.persistence_state() {
        PersistenceState::Persisted => {
            say(Line::Done, "IndexedDB available - state will persist across page refreshes");
        }
        PersistenceState::MemoryOnly => {
            say(Line::Info, "⚠️ Memory-only mode - state will be lost on page refresh");
            say(Line::Info, "   (This happens in private browsing or third-party iframes)");
        }
    }

    let students = store.students();
    say(Line::Info, &format!("   Students restored from last visit: {}", students.len()));
    say(Line::Info, "");

    // =========================================================================
    // Step 2: Populate collections, as the backend fetch flows would
    // =========================================================================
    say(Line::Info, "📝 Setting collections...");

    let mut next = students;
    next.push(json!({"id": next.len() + 1, "name": format!("Student {}", next.len() + 1)}));
    store.set_students(next);
    store.set_classes(vec![json!({"id": "6A"}), json!({"id": "5B"})]);
    store.set_current_academic_year(Some(json!({"id": "2024-2025"})));

    say(Line::Info, &format!("   students: {}", store.students().len()));
    say(Line::Info, &format!("   classes: {}", store.classes().len()));
    say(Line::Info, "");

    // =========================================================================
    // Step 3: Registration wizard draft
    // =========================================================================
    say(Line::Info, "🧾 Filling a registration draft, then leaving the wizard...");

    let mut draft = RegistrationDraft::default();
    draft.student.insert("firstName".into(), json!("Awa"));
    store.set_registration(draft);
    say(Line::Info, &format!("   draft empty: {}", store.registration().is_empty()));

    store.on_navigate("/registration/student", "/dashboard");
    say(Line::Info, &format!("   draft empty after leaving: {}", store.registration().is_empty()));
    say(Line::Info, "");

    // =========================================================================
    // Step 4: Persistence health
    // =========================================================================
    next_tick().await;
    let health = store.persist_health();
    if health.last_persist_failed() {
        say(Line::Failed, &format!("Last write failed: {:?}", health.last_error));
    } else {
        say(Line::Done, &format!(
            "Snapshot v{} persisted",
            health.last_persisted_version.unwrap_or_default()
        ));
    }
    say(Line::Info, "");

    say(Line::Info, "🎉 Demo complete!");
    say(Line::Info, "");
    say(Line::Info, "Refresh the page - the student count should grow by one each visit.");

    Ok(())
}
