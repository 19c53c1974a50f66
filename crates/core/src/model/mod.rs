mod category;
mod exam;
mod ids;
mod progress;
mod question;
mod wire;

pub use ids::{ParseIdError, QuestionId, UserId};

pub use category::CategoryProgress;
pub use exam::ExamAttempt;
pub use progress::{ImportError, ProgressRecord, ProgressStats};
pub use question::{QuestionProgress, QuestionProgressPatch, QuestionStatus};
