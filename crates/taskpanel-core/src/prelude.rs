//! Common imports for typical panel usage.
pub use crate::{
    AbortHandle, ChannelCallbacks, Completion, Credential, CredentialPair, CredentialStore,
    EventKind, FileKvStorage, Panel, PanelConfig, PanelError, RunCallbacks, RunEvent, RunFailure,
    RunHandle, RunMessage, RunState, StreamRunner,
};
