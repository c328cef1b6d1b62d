use deckhand::recipes::{interpolate, interpolate_map};
use serde_json::json;

fn ctx() -> serde_json::Value {
    json!({
        "input": {
            "folder": "/media/session",
            "use_gpu": true,
            "count": 3,
            "tags": ["a", "b"],
            "render": {"preset": "General LP Export"},
        },
        "steps": {
            "transcribe": {"files_processed": 2},
        },
    })
}

#[test]
fn whole_string_placeholder_preserves_the_leaf_type() {
    assert_eq!(interpolate(&json!("${input.use_gpu}"), &ctx()), json!(true));
    assert_eq!(interpolate(&json!("${input.count}"), &ctx()), json!(3));
    assert_eq!(
        interpolate(&json!("${input.tags}"), &ctx()),
        json!(["a", "b"])
    );
    assert_eq!(
        interpolate(&json!("${input.render}"), &ctx()),
        json!({"preset": "General LP Export"})
    );
}

#[test]
fn embedded_placeholders_substitute_by_string_conversion() {
    assert_eq!(
        interpolate(&json!("processed ${input.count} of ${input.folder}"), &ctx()),
        json!("processed 3 of /media/session")
    );
    assert_eq!(
        interpolate(&json!("gpu=${input.use_gpu}"), &ctx()),
        json!("gpu=true")
    );
}

#[test]
fn missing_paths_resolve_to_nothing() {
    // Embedded form renders as the empty string.
    assert_eq!(
        interpolate(&json!("folder: ${input.missing}!"), &ctx()),
        json!("folder: !")
    );
    // Value form drops the mapping entry and nulls inside arrays.
    let resolved = interpolate(
        &json!({"kept": "${input.folder}", "dropped": "${input.missing}"}),
        &ctx(),
    );
    assert_eq!(resolved, json!({"kept": "/media/session"}));
    assert_eq!(
        interpolate(&json!(["${input.missing}", "${input.count}"]), &ctx()),
        json!([null, 3])
    );
}

#[test]
fn interpolation_recurses_into_arrays_and_mappings() {
    let template = json!({
        "payload": {
            "folder_path": "${input.folder}",
            "nested": [{"gpu": "${input.use_gpu}"}],
        },
    });
    assert_eq!(
        interpolate(&template, &ctx()),
        json!({
            "payload": {
                "folder_path": "/media/session",
                "nested": [{"gpu": true}],
            },
        })
    );
}

#[test]
fn dotted_paths_traverse_mappings_and_array_indices() {
    assert_eq!(
        interpolate(&json!("${input.tags.1}"), &ctx()),
        json!("b")
    );
    assert_eq!(
        interpolate(&json!("${steps.transcribe.files_processed}"), &ctx()),
        json!(2)
    );
}

#[test]
fn unclosed_placeholders_stay_literal() {
    assert_eq!(
        interpolate(&json!("broken ${input.folder"), &ctx()),
        json!("broken ${input.folder")
    );
}

#[test]
fn placeholder_shaped_context_leaves_resolve_through_to_their_target() {
    let ctx = json!({
        "input": {
            "folder": "/media/session",
            "note": "${input.folder}",
            "label": "in ${input.folder}",
        },
    });
    // One pass already lands on the final leaf...
    let once = interpolate(&json!("${input.note}"), &ctx);
    assert_eq!(once, json!("/media/session"));
    // ...so a second pass changes nothing.
    assert_eq!(interpolate(&once, &ctx), once);

    // Leaves with embedded placeholders render fully as well.
    assert_eq!(
        interpolate(&json!("${input.label}"), &ctx),
        json!("in /media/session")
    );
    assert_eq!(
        interpolate(&json!("note: ${input.note}!"), &ctx),
        json!("note: /media/session!")
    );
}

#[test]
fn reference_cycles_resolve_like_missing_paths() {
    let ctx = json!({
        "input": {
            "a": "${input.b}",
            "b": "${input.a}",
            "selfish": "${input.selfish}",
            "embedded": "x ${input.embedded} y",
        },
    });
    for template in [
        json!("${input.a}"),
        json!("${input.selfish}"),
        json!({"kept": "literal", "cyclic": "${input.a}"}),
        json!("tail ${input.embedded}"),
    ] {
        let once = interpolate(&template, &ctx);
        let twice = interpolate(&once, &ctx);
        assert_eq!(once, twice, "cycle handling must stay idempotent");
    }
    assert_eq!(interpolate(&json!("${input.selfish}"), &ctx), json!(null));
    assert_eq!(
        interpolate(&json!({"cyclic": "${input.a}"}), &ctx),
        json!({})
    );
    assert_eq!(
        interpolate(&json!("tail ${input.embedded}"), &ctx),
        json!("tail x  y")
    );
}

#[test]
fn interpolation_is_idempotent_for_a_fixed_context() {
    let template = json!({
        "a": "${input.folder}",
        "b": "count=${input.count}",
        "c": ["${input.tags}", "${input.missing}"],
        "d": {"nested": "${input.render}"},
    });
    let once = interpolate(&template, &ctx());
    let twice = interpolate(&once, &ctx());
    assert_eq!(once, twice);
}

#[test]
fn interpolate_map_yields_an_empty_mapping_for_non_mapping_templates() {
    assert!(interpolate_map(&json!(null), &ctx()).is_empty());
    let map = interpolate_map(&json!({"folder_path": "${input.folder}"}), &ctx());
    assert_eq!(map.get("folder_path"), Some(&json!("/media/session")));
}
