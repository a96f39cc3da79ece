pub mod channel;
pub mod ids;
pub mod message;
pub mod page;
pub mod timestamp;

pub use channel::Channel;
pub use ids::{ChannelId, LocalId, MessageId, SenderId};
pub use message::{Draft, Message, NewMessage, SenderIdentity};
pub use page::{Page, PageCursor};
pub use timestamp::Timestamp;
