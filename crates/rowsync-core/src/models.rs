//! Core domain models and strongly-typed identifiers.
//!
//! Defines the synchronized `Record`, its delivery state, the category
//! groups used for eligibility, and the `Nullable` wrapper for optional
//! business columns. Includes database serialization traits so the
//! repository can map rows directly into these types.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, Serializer};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Value of the `state` column for a live record.
pub const ACTIVE_STATE: i32 = 1;

/// Value of the `audit_state` column once a record passed the approval gate.
pub const APPROVED_AUDIT_STATE: i64 = 2;

/// Strongly-typed record identifier.
///
/// Records are keyed by a business code assigned upstream, so the identifier
/// wraps a string rather than a generated UUID.
///
/// # Example
///
/// ```
/// use rowsync_core::models::RecordCode;
/// let code = RecordCode::from("U-1001");
/// assert_eq!(code.as_str(), "U-1001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCode(pub String);

impl RecordCode {
    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for RecordCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

impl sqlx::Type<PgDb> for RecordCode {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RecordCode {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let code = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(code))
    }
}

impl sqlx::Encode<'_, PgDb> for RecordCode {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Delivery state of a record.
///
/// Stored as an integer column. Only the synchronization engine and the
/// on-demand handler move a record out of `Pending`:
///
/// ```text
/// Pending(1) -> Synced(2)   downstream accepted the record
///            -> Failed(3)   transport failure or downstream rejection
/// ```
///
/// `Failed` is not picked up again by polling; an external process has to
/// reset the record to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SyncState {
    /// Waiting for delivery.
    Pending,
    /// Accepted by the downstream service.
    Synced,
    /// Last delivery attempt failed.
    Failed,
}

impl SyncState {
    /// Returns the integer stored in the `sync_state` column.
    pub const fn code(self) -> i32 {
        match self {
            Self::Pending => 1,
            Self::Synced => 2,
            Self::Failed => 3,
        }
    }
}

impl From<SyncState> for i32 {
    fn from(state: SyncState) -> Self {
        state.code()
    }
}

impl TryFrom<i32> for SyncState {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Synced),
            3 => Ok(Self::Failed),
            other => Err(format!("invalid sync state: {other}")),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Synced => write!(f, "synced"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for SyncState {
    fn type_info() -> PgTypeInfo {
        <i32 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SyncState {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let code = <i32 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self::try_from(code)?)
    }
}

impl sqlx::Encode<'_, PgDb> for SyncState {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i32 as sqlx::Encode<PgDb>>::encode_by_ref(&self.code(), buf)
    }
}

/// Business category a record belongs to.
///
/// Only these categories are synchronized. Records with any other value in
/// the `category` column stay untouched by the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Independent caterer cooking for village banquets.
    VillageChef,
    /// Farm-stay restaurant.
    FarmStay,
    /// Rural hotel.
    CountryHotel,
}

impl Category {
    /// Returns the label stored in the `category` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VillageChef => "village_chef",
            Self::FarmStay => "farm_stay",
            Self::CountryHotel => "country_hotel",
        }
    }

    /// Returns the selection group this category is queried in.
    pub const fn group(self) -> CategoryGroup {
        match self {
            Self::VillageChef => CategoryGroup::Chefs,
            Self::FarmStay | Self::CountryHotel => CategoryGroup::Hospitality,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "village_chef" => Ok(Self::VillageChef),
            "farm_stay" => Ok(Self::FarmStay),
            "country_hotel" => Ok(Self::CountryHotel),
            other => Err(format!("unsupported category: {other}")),
        }
    }
}

/// Group of categories selected together by one eligibility query.
///
/// Each group is queried separately with its own row cap, and the results
/// are concatenated in the order of [`CategoryGroup::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryGroup {
    /// Village chefs.
    Chefs,
    /// Farm stays and country hotels.
    Hospitality,
}

impl CategoryGroup {
    /// All groups in query order.
    pub const ALL: [Self; 2] = [Self::Chefs, Self::Hospitality];

    /// Categories covered by this group.
    pub const fn categories(self) -> &'static [Category] {
        match self {
            Self::Chefs => &[Category::VillageChef],
            Self::Hospitality => &[Category::FarmStay, Category::CountryHotel],
        }
    }

    /// Column labels of the categories in this group.
    pub fn labels(self) -> Vec<String> {
        self.categories().iter().map(|category| category.as_str().to_string()).collect()
    }
}

impl fmt::Display for CategoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chefs => write!(f, "chefs"),
            Self::Hospitality => write!(f, "hospitality"),
        }
    }
}

/// Value substituted for an absent column when a record is serialized.
pub trait Placeholder {
    /// Returns the neutral placeholder value.
    fn placeholder() -> Self;
}

impl Placeholder for String {
    fn placeholder() -> Self {
        Self::new()
    }
}

impl Placeholder for i32 {
    fn placeholder() -> Self {
        0
    }
}

impl Placeholder for i64 {
    fn placeholder() -> Self {
        0
    }
}

impl Placeholder for f64 {
    fn placeholder() -> Self {
        0.0
    }
}

/// Nullable business column.
///
/// Reads SQL `NULL` as absent. Serializes an absent value as the type's
/// [`Placeholder`] (`""` for text, `0` for numbers), so the downstream
/// service always receives every field with a concrete value.
///
/// ```
/// use rowsync_core::models::Nullable;
///
/// let present = Nullable::from("Hill Farm".to_string());
/// let absent: Nullable<i64> = Nullable::absent();
///
/// assert_eq!(serde_json::to_string(&present).unwrap(), "\"Hill Farm\"");
/// assert_eq!(serde_json::to_string(&absent).unwrap(), "0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Nullable<T>(pub Option<T>);

impl<T> Nullable<T> {
    /// Creates an absent value.
    pub const fn absent() -> Self {
        Self(None)
    }

    /// Returns true when the column held a value.
    pub const fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// Borrows the inner value, if any.
    pub const fn as_option(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T> From<T> for Nullable<T> {
    fn from(value: T) -> Self {
        Self(Some(value))
    }
}

impl<T> Serialize for Nullable<T>
where
    T: Serialize + Placeholder,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(value) => value.serialize(serializer),
            None => T::placeholder().serialize(serializer),
        }
    }
}

impl<'de, T> Deserialize<'de> for Nullable<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Self)
    }
}

impl<T> sqlx::Type<PgDb> for Nullable<T>
where
    T: sqlx::Type<PgDb>,
{
    fn type_info() -> PgTypeInfo {
        T::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        T::compatible(ty)
    }
}

impl<'r, T> sqlx::Decode<'r, PgDb> for Nullable<T>
where
    T: sqlx::Decode<'r, PgDb>,
{
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        <Option<T> as sqlx::Decode<'r, PgDb>>::decode(value).map(Self)
    }
}

/// A business record propagated to the downstream service.
///
/// The status columns (`state`, `audit_state`, `category`) are owned by
/// upstream processes and only read here. `sync_state` is the single column
/// written by synchronization. Every other field is payload and is forwarded
/// verbatim as a JSON object with these field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Record {
    /// Unique business code.
    pub code: RecordCode,

    /// Display name.
    pub name: String,

    /// Contact mobile phone.
    pub mobile_phone: String,

    /// Category label, see [`Category`].
    pub category: String,

    /// Liveness flag, [`ACTIVE_STATE`] when the record is live.
    pub state: i32,

    /// Approval flag, [`APPROVED_AUDIT_STATE`] once approved.
    #[serde(default)]
    pub audit_state: Nullable<i64>,

    /// Delivery state.
    pub sync_state: SyncState,

    /// Registered company name.
    #[serde(default)]
    pub company_name: Nullable<String>,

    /// Login name on the upstream platform.
    #[serde(default)]
    pub login_name: Nullable<String>,

    /// National identity card number.
    #[serde(default)]
    pub id_card: Nullable<String>,

    /// Sex as recorded upstream.
    #[serde(default)]
    pub sex: Nullable<String>,

    /// Birthday as recorded upstream.
    #[serde(default)]
    pub birthday: Nullable<String>,

    /// Province.
    #[serde(default)]
    pub province: Nullable<String>,

    /// City.
    #[serde(default)]
    pub city: Nullable<String>,

    /// County or district.
    #[serde(default)]
    pub area: Nullable<String>,

    /// Town.
    #[serde(default)]
    pub town: Nullable<String>,

    /// Village.
    #[serde(default)]
    pub village: Nullable<String>,

    /// Street address.
    #[serde(default)]
    pub address: Nullable<String>,

    /// Avatar or logo image path.
    #[serde(default)]
    pub logo_url: Nullable<String>,

    /// Business license image path.
    #[serde(default)]
    pub business_license_url: Nullable<String>,

    /// Food service license image path.
    #[serde(default)]
    pub food_license_url: Nullable<String>,

    /// Health certificate image path.
    #[serde(default)]
    pub health_certificate_url: Nullable<String>,

    /// Health certificate expiry date.
    #[serde(default)]
    pub health_certificate_due: Nullable<String>,

    /// Membership level.
    #[serde(default)]
    pub level: Nullable<String>,

    /// Banquets served.
    #[serde(default)]
    pub banquet_count: Nullable<i64>,

    /// Banquet reports filed.
    #[serde(default)]
    pub report_count: Nullable<i64>,

    /// Registration channel.
    #[serde(default)]
    pub register_source: Nullable<i64>,

    /// Creation time as recorded upstream.
    #[serde(default)]
    pub created_at: Nullable<String>,
}

impl Record {
    /// Creates an active, approved, pending record with no optional fields.
    pub fn pending(
        code: impl Into<RecordCode>,
        name: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            mobile_phone: String::new(),
            category: category.as_str().to_string(),
            state: ACTIVE_STATE,
            audit_state: Nullable::from(APPROVED_AUDIT_STATE),
            sync_state: SyncState::Pending,
            company_name: Nullable::absent(),
            login_name: Nullable::absent(),
            id_card: Nullable::absent(),
            sex: Nullable::absent(),
            birthday: Nullable::absent(),
            province: Nullable::absent(),
            city: Nullable::absent(),
            area: Nullable::absent(),
            town: Nullable::absent(),
            village: Nullable::absent(),
            address: Nullable::absent(),
            logo_url: Nullable::absent(),
            business_license_url: Nullable::absent(),
            food_license_url: Nullable::absent(),
            health_certificate_url: Nullable::absent(),
            health_certificate_due: Nullable::absent(),
            level: Nullable::absent(),
            banquet_count: Nullable::absent(),
            report_count: Nullable::absent(),
            register_source: Nullable::absent(),
            created_at: Nullable::absent(),
        }
    }

    /// Returns true when the record is live.
    pub fn is_active(&self) -> bool {
        self.state == ACTIVE_STATE
    }

    /// Returns true when the record passed the approval gate.
    pub fn is_approved(&self) -> bool {
        self.audit_state.as_option() == Some(&APPROVED_AUDIT_STATE)
    }

    /// Parses the category label, `None` for unsupported categories.
    pub fn category(&self) -> Option<Category> {
        self.category.parse().ok()
    }

    /// Returns true when polling should deliver this record as part of
    /// `group`.
    pub fn is_eligible_in(&self, group: CategoryGroup) -> bool {
        self.sync_state == SyncState::Pending
            && self.is_active()
            && self.is_approved()
            && self.category().is_some_and(|category| category.group() == group)
    }

    /// Returns true when polling should deliver this record.
    pub fn is_eligible(&self) -> bool {
        CategoryGroup::ALL.iter().any(|group| self.is_eligible_in(*group))
    }
}
