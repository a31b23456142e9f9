//! Dual-calendar support: BS/AD conversion, the served calendar dataset and
//! month navigation over it.

pub mod conversion;
pub mod dataset;
pub mod navigation;

pub use conversion::{
    BsCalendarTable, BsDate, ConversionError, convert_ad_to_bs, convert_bs_to_ad,
    expand_date_range_ad, parse_ad, parse_bs, today_ad, today_bs,
};
pub use dataset::{
    AdRange, CalendarDataset, CalendarDay, CalendarMonth, DatasetCache, DatasetError,
    DatasetProvider, FetchTicket, FileDatasetProvider, TableDatasetProvider, VisibleMonth,
};
pub use navigation::MonthCursor;
