pub mod diagnosis_code;
pub mod enums;
pub mod filters;
pub mod patient;
pub mod soap_note;
pub mod user;

pub use diagnosis_code::DiagnosisCode;
pub use enums::{NoteStatus, UserRole};
pub use filters::NoteFilter;
pub use patient::Patient;
pub use soap_note::{EditHistoryEntry, FieldChange, NoteContentUpdate, SoapNote};
pub use user::{User, UserProfile};
