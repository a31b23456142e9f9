pub mod attendance;
pub mod calendar;
pub mod codec;
pub mod config;
pub mod error;
#[cfg(feature = "http_api")]
pub mod http_api;
pub mod leave;
pub mod lifecycle;
pub mod notification;
pub mod persistence;
pub mod student;

pub use attendance::{AttendanceReconciler, DayMark, DayMarkers, MonthGrid, MonthlyReport};
pub use calendar::{
    AdRange, BsCalendarTable, BsDate, CalendarDataset, ConversionError, DatasetCache,
    DatasetProvider, MonthCursor, VisibleMonth, convert_ad_to_bs, convert_bs_to_ad,
    expand_date_range_ad,
};
pub use codec::{CodecError, DecodedLeaves, LeaveRecordCodec, QuarantinedRecord};
pub use config::ServiceConfig;
pub use error::{Classify, ErrorKind};
pub use leave::{LeaveEntry, LeavePeriod, LeaveStatus, PeriodType, Transition};
pub use lifecycle::{
    Clock, CommittedReview, FixedClock, LeaveBook, LeaveLifecycleManager, LifecycleError,
    SystemClock, TransitionOutcome, TransitionWarning,
};
pub use notification::{
    NotificationDispatcher, NotificationError, NotificationMessage, NotificationSink,
    RecordingSink,
};
#[cfg(feature = "sqlite")]
pub use persistence::sqlite::SqliteStudentStore;
pub use persistence::{
    InMemoryStudentStore, JsonFileStudentStore, StoreError, StoreResult, StudentStore,
};
pub use student::StudentAggregate;
