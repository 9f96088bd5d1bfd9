pub mod drafts;
pub mod live;
pub mod notifications;
pub mod packages;
pub mod realtime;
pub mod remote_drafts;
pub mod storage;
pub mod supabase;
pub mod sync;
pub mod trips;
