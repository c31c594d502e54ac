//! 智能体层：流水线数据模型与四个阶段（感知 → 推理 → 执行 → 对话）

pub mod actor;
pub mod dialog;
pub mod json;
pub mod perceiver;
pub mod reasoner;
pub mod stage;
pub mod types;

pub use actor::{ActInput, Actor};
pub use dialog::{synthesize_failure, Dialog, RenderInput, DIALOG_ROLE};
pub use perceiver::{extract_rule_entities, PerceiveInput, Perceiver, PERCEIVER_ROLE};
pub use reasoner::{ReasonInput, Reasoner, REASONER_ROLE};
pub use stage::Stage;
pub use types::{
    as_ref_placeholder, parse_ref, ActorResult, ContentItem, DialogOutput, Entity, EntityKind,
    Envelope, ImageRef, Intent, PerceptionResult, Plan, RawInput, Step, StepAction, REF_KEY,
};
