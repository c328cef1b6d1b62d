#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub cmd: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const TRANSCRIBE_FIELDS: &[FieldSpec] = &[
    required("folder_path", FieldKind::String),
    optional("language", FieldKind::String),
    optional("model", FieldKind::String),
    optional("output_mode", FieldKind::String),
    optional("overwrite", FieldKind::Boolean),
    optional("use_gpu", FieldKind::Boolean),
    optional("engine", FieldKind::String),
];

const ADD_MARKER_FIELDS: &[FieldSpec] = &[
    optional("timecode", FieldKind::String),
    optional("frame", FieldKind::Number),
    optional("color", FieldKind::String),
    optional("name", FieldKind::String),
    optional("note", FieldKind::String),
    optional("duration", FieldKind::Number),
    optional("custom_data", FieldKind::String),
];

const GOTO_FIELDS: &[FieldSpec] = &[
    optional("timecode", FieldKind::String),
    optional("frame", FieldKind::Number),
];

const UPDATE_TEXT_FIELDS: &[FieldSpec] = &[
    required("track", FieldKind::Number),
    required("start_frame", FieldKind::Number),
    required("tool_name", FieldKind::String),
    required("text", FieldKind::String),
];

const CONNECT_FIELDS: &[FieldSpec] = &[optional("project", FieldKind::String)];

const SPELLCHECK_FIELDS: &[FieldSpec] = &[optional("language", FieldKind::String)];

const LEADERPASS_UPLOAD_FIELDS: &[FieldSpec] = &[
    required("file_path", FieldKind::String),
    optional("chunk_size", FieldKind::Number),
];

const LEADERPASS_AUTH_FIELDS: &[FieldSpec] = &[optional("token", FieldKind::String)];

const NO_FIELDS: &[FieldSpec] = &[];

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec { cmd: "connect", fields: CONNECT_FIELDS },
    CommandSpec { cmd: "context", fields: NO_FIELDS },
    CommandSpec { cmd: "add_marker", fields: ADD_MARKER_FIELDS },
    CommandSpec { cmd: "start_render", fields: NO_FIELDS },
    CommandSpec { cmd: "stop_render", fields: NO_FIELDS },
    CommandSpec { cmd: "create_project_bins", fields: NO_FIELDS },
    CommandSpec { cmd: "update_text", fields: UPDATE_TEXT_FIELDS },
    CommandSpec { cmd: "goto", fields: GOTO_FIELDS },
    CommandSpec { cmd: "spellcheck", fields: SPELLCHECK_FIELDS },
    CommandSpec { cmd: "lp_base_export", fields: NO_FIELDS },
    CommandSpec { cmd: "shutdown", fields: NO_FIELDS },
    CommandSpec { cmd: "transcribe", fields: TRANSCRIBE_FIELDS },
    CommandSpec { cmd: "transcribe_folder", fields: TRANSCRIBE_FIELDS },
    CommandSpec { cmd: "test_cuda", fields: NO_FIELDS },
    CommandSpec { cmd: "leaderpass_auth", fields: LEADERPASS_AUTH_FIELDS },
    CommandSpec { cmd: "leaderpass_upload", fields: LEADERPASS_UPLOAD_FIELDS },
];

/// Payload schema for a command. Unknown commands get an empty spec; the
/// router rejects them by ownership lookup before schema checks matter.
pub fn command_spec(cmd: &str) -> CommandSpec {
    COMMAND_SPECS
        .iter()
        .copied()
        .find(|spec| spec.cmd == cmd)
        .unwrap_or(CommandSpec {
            cmd: "",
            fields: NO_FIELDS,
        })
}
