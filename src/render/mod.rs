//! Render-time side: load plans for a project's assets and the embedding tag
//! that turns a plan into markup.

mod cache;
mod cdn;
mod planner;
mod tag;

pub use cache::PlanCache;
pub use cdn::{CdnRewriter, PrefixCdnRewriter};
pub use planner::{LoadPlan, LoadPlanner, LoadStrategy, LoadingMode, PlannedAsset};
pub use tag::{RenderContext, RenderOutput, TagOptions, TagRenderer, escape_html};
