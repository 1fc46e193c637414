mod assistant_block;
mod conversation;
mod node;
mod thought_step;
mod user_bubble;

#[allow(unused_imports)]
pub use assistant_block::AssistantBlock;
pub use conversation::Conversation;
pub use node::Node;
pub use thought_step::ThoughtStep;
pub use user_bubble::UserBubble;
