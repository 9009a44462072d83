use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::csv::RawRow;
use crate::model::{
    format_class_name, Address, BloodGroup, DisabilityInfo, Gender, GuardianInfo,
    InsuranceStatus, PrimaryGuardian, StudentRecord, Title, CLASS_LEVELS, PLACEHOLDER_PREFIX,
};

/// Standard template columns, in export order.
pub const STANDARD_HEADERS: &[&str] = &[
    "studentId",
    "id",
    "classLevel",
    "title",
    "titleOther",
    "firstName",
    "lastName",
    "gender",
    "birthDate",
    "phoneNumber",
    "weight",
    "height",
    "bloodGroup",
    "ethnicity",
    "nationality",
    "religion",
    "address_houseNumber",
    "address_moo",
    "address_street",
    "address_subDistrict",
    "address_district",
    "address_province",
    "father_title",
    "father_titleOther",
    "father_firstName",
    "father_lastName",
    "father_occupation",
    "father_phoneNumber",
    "mother_title",
    "mother_titleOther",
    "mother_firstName",
    "mother_lastName",
    "mother_occupation",
    "mother_phoneNumber",
    "parent_title",
    "parent_titleOther",
    "parent_firstName",
    "parent_lastName",
    "parent_occupation",
    "parent_relationship",
    "parent_phoneNumber",
    "disability_hasDisability",
    "disability_description",
    "insurance",
];

/// Column names used by the district office export.
pub mod th {
    pub const STUDENT_NUMBER: &str = "เลขประจำตัวนักเรียน";
    pub const NATIONAL_ID: &str = "เลขบัตรประชาชน";
    pub const CLASS: &str = "ชั้น";
    pub const TITLE: &str = "คำนำหน้าชื่อ";
    pub const FIRST_NAME: &str = "ชื่อ";
    pub const LAST_NAME: &str = "นามสกุล";
    pub const GENDER: &str = "เพศ";
    pub const BIRTH_DATE: &str = "วันเกิด";
    pub const PHONE: &str = "เบอร์โทรศัพท์";
    pub const WEIGHT: &str = "น้ำหนัก";
    pub const HEIGHT: &str = "ส่วนสูง";
    pub const BLOOD_GROUP: &str = "กลุ่มเลือด";
    pub const ETHNICITY: &str = "เชื้อชาติ";
    pub const NATIONALITY: &str = "สัญชาติ";
    pub const RELIGION: &str = "ศาสนา";
    pub const HOUSE_NUMBER: &str = "บ้านเลขที่";
    pub const MOO: &str = "หมู่";
    pub const STREET: &str = "ถนน/ซอย";
    pub const SUB_DISTRICT: &str = "ตำบล";
    pub const DISTRICT: &str = "อำเภอ";
    pub const PROVINCE: &str = "จังหวัด";
    pub const FATHER_FIRST_NAME: &str = "ชื่อบิดา";
    pub const FATHER_LAST_NAME: &str = "นามสกุลบิดา";
    pub const FATHER_OCCUPATION: &str = "อาชีพของบิดา";
    pub const MOTHER_FIRST_NAME: &str = "ชื่อมารดา";
    pub const MOTHER_LAST_NAME: &str = "นามสกุลมารดา";
    pub const MOTHER_OCCUPATION: &str = "อาชีพของมารดา";
    pub const PARENT_FIRST_NAME: &str = "ชื่อผู้ปกครอง";
    pub const PARENT_LAST_NAME: &str = "นามสกุลผู้ปกครอง";
    pub const PARENT_OCCUPATION: &str = "อาชีพของผู้ปกครอง";
    pub const PARENT_RELATIONSHIP: &str = "ความเกี่ยวข้องของผู้ปกครองกับนักเรียน";
    pub const DISADVANTAGE: &str = "ความด้อยโอกาส";

    #[cfg(test)]
    pub const HEADERS: &[&str] = &[
        STUDENT_NUMBER,
        NATIONAL_ID,
        CLASS,
        TITLE,
        FIRST_NAME,
        LAST_NAME,
        GENDER,
        BIRTH_DATE,
        PHONE,
        WEIGHT,
        HEIGHT,
        BLOOD_GROUP,
        ETHNICITY,
        NATIONALITY,
        RELIGION,
        HOUSE_NUMBER,
        MOO,
        STREET,
        SUB_DISTRICT,
        DISTRICT,
        PROVINCE,
        FATHER_FIRST_NAME,
        FATHER_LAST_NAME,
        FATHER_OCCUPATION,
        MOTHER_FIRST_NAME,
        MOTHER_LAST_NAME,
        MOTHER_OCCUPATION,
        PARENT_FIRST_NAME,
        PARENT_LAST_NAME,
        PARENT_OCCUPATION,
        PARENT_RELATIONSHIP,
        DISADVANTAGE,
    ];
}

/// Values the localized export uses for "unknown", "none" or "not applicable".
const SENTINELS: [&str; 6] = ["-", "ไม่ปรากฎ", "ไม่ปรากฏ", "ไม่ได้ประกอบอาชีพ", "ไม่มี", "ไม่ทราบ"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Schema {
    Standard,
    Localized,
}

fn has_header(headers: &[String], name: &str) -> bool {
    headers.iter().any(|h| h == name)
}

pub fn is_standard(headers: &[String]) -> bool {
    has_header(headers, "firstName") && has_header(headers, "father_firstName")
}

pub fn is_localized(headers: &[String]) -> bool {
    has_header(headers, th::STUDENT_NUMBER) && has_header(headers, th::PARENT_FIRST_NAME)
}

pub fn detect_schema(headers: &[String]) -> Option<Schema> {
    if is_standard(headers) {
        Some(Schema::Standard)
    } else if is_localized(headers) {
        Some(Schema::Localized)
    } else {
        None
    }
}

/// Hands out `TEMP_<millis>_<n>` student numbers, unique within one import.
#[derive(Debug, Clone)]
pub struct Placeholders {
    stamp: i64,
    next: u32,
}

impl Placeholders {
    pub fn new(stamp_millis: i64) -> Self {
        Placeholders {
            stamp: stamp_millis,
            next: 0,
        }
    }

    pub fn starting_now() -> Self {
        Placeholders::new(Utc::now().timestamp_millis())
    }

    fn issue(&mut self) -> String {
        let id = format!("{PLACEHOLDER_PREFIX}{}_{}", self.stamp, self.next);
        self.next += 1;
        id
    }
}

pub fn normalize(schema: Schema, row: &RawRow, ids: &mut Placeholders) -> StudentRecord {
    match schema {
        Schema::Standard => normalize_standard(row, ids),
        Schema::Localized => normalize_localized(row, ids),
    }
}

fn raw<'a>(row: &'a RawRow, key: &str) -> &'a str {
    row.get(key).map(|v| v.trim()).unwrap_or("")
}

fn text(row: &RawRow, key: &str) -> String {
    raw(row, key).to_string()
}

/// Like `text`, but sentinel values read as empty.
fn clean(row: &RawRow, key: &str) -> String {
    let v = raw(row, key);
    if SENTINELS.contains(&v) {
        String::new()
    } else {
        v.to_string()
    }
}

fn or_default(v: String, default: &str) -> String {
    if v.is_empty() {
        default.to_string()
    } else {
        v
    }
}

/// Blank or unparseable numbers become 0.
fn measure(v: &str) -> Option<f64> {
    let n = v.trim().parse::<f64>().unwrap_or(0.0);
    Some(if n.is_finite() { n } else { 0.0 })
}

fn class_level(v: &str) -> String {
    or_default(format_class_name(v), CLASS_LEVELS[0])
}

/// Unrecognized titles are kept as an "other" override rather than dropped.
fn title_with_override(raw_title: &str, raw_other: String, default: Title) -> (Title, String) {
    if raw_title.is_empty() {
        return (default, raw_other);
    }
    match Title::parse(raw_title) {
        Some(t) => (t, raw_other),
        None if raw_other.is_empty() => (Title::Other, raw_title.to_string()),
        None => (Title::Other, raw_other),
    }
}

fn standard_guardian(row: &RawRow, prefix: &str, default: Title) -> GuardianInfo {
    let key = |field: &str| format!("{prefix}_{field}");
    let (title, title_other) =
        title_with_override(raw(row, &key("title")), text(row, &key("titleOther")), default);
    GuardianInfo {
        title,
        title_other,
        first_name: text(row, &key("firstName")),
        last_name: text(row, &key("lastName")),
        occupation: text(row, &key("occupation")),
        phone_number: text(row, &key("phoneNumber")),
    }
}

/// Maps one row of the standard template onto the canonical record.
pub fn normalize_standard(row: &RawRow, ids: &mut Placeholders) -> StudentRecord {
    let (title, title_other) =
        title_with_override(raw(row, "title"), text(row, "titleOther"), Title::Boy);
    let student_number = match raw(row, "studentId") {
        "" => ids.issue(),
        v => v.to_string(),
    };
    StudentRecord {
        storage_key: None,
        national_id: text(row, "id"),
        student_number,
        class_level: class_level(raw(row, "classLevel")),
        title,
        title_other,
        first_name: text(row, "firstName"),
        last_name: text(row, "lastName"),
        gender: Gender::parse(raw(row, "gender")).unwrap_or(Gender::Male),
        birth_date: text(row, "birthDate"),
        phone_number: text(row, "phoneNumber"),
        weight: measure(raw(row, "weight")),
        height: measure(raw(row, "height")),
        blood_group: BloodGroup::parse(raw(row, "bloodGroup")).unwrap_or_default(),
        ethnicity: text(row, "ethnicity"),
        nationality: text(row, "nationality"),
        religion: text(row, "religion"),
        address: Address {
            house_number: text(row, "address_houseNumber"),
            moo: text(row, "address_moo"),
            street: text(row, "address_street"),
            sub_district: text(row, "address_subDistrict"),
            district: text(row, "address_district"),
            province: text(row, "address_province"),
        },
        father: standard_guardian(row, "father", Title::Mister),
        mother: standard_guardian(row, "mother", Title::Missus),
        parent: PrimaryGuardian {
            info: standard_guardian(row, "parent", Title::Mister),
            relationship: text(row, "parent_relationship"),
        },
        disability: DisabilityInfo {
            has_disability: raw(row, "disability_hasDisability").eq_ignore_ascii_case("true"),
            description: text(row, "disability_description"),
        },
        insurance_status: InsuranceStatus::from_literal(raw(row, "insurance")),
    }
}

fn localized_gender(v: &str) -> Gender {
    match v {
        "ช" => Gender::Male,
        "ญ" => Gender::Female,
        other => Gender::parse(other).unwrap_or(Gender::Male),
    }
}

fn localized_guardian(row: &RawRow, title: Title, first: &str, last: &str, job: &str) -> GuardianInfo {
    GuardianInfo {
        title,
        title_other: String::new(),
        first_name: clean(row, first),
        last_name: clean(row, last),
        occupation: clean(row, job),
        phone_number: String::new(),
    }
}

/// Maps one row of the Thai-header export onto the canonical record.
pub fn normalize_localized(row: &RawRow, ids: &mut Placeholders) -> StudentRecord {
    let (title, title_other) = title_with_override(&clean(row, th::TITLE), String::new(), Title::Boy);
    let mut student_number = clean(row, th::STUDENT_NUMBER);
    if student_number.is_empty() {
        student_number = ids.issue();
    }
    let disadvantage = clean(row, th::DISADVANTAGE);
    StudentRecord {
        storage_key: None,
        national_id: clean(row, th::NATIONAL_ID),
        student_number,
        class_level: class_level(&clean(row, th::CLASS)),
        title,
        title_other,
        first_name: clean(row, th::FIRST_NAME),
        last_name: clean(row, th::LAST_NAME),
        gender: localized_gender(raw(row, th::GENDER)),
        birth_date: thai_date_to_iso(raw(row, th::BIRTH_DATE)),
        phone_number: clean(row, th::PHONE),
        weight: measure(raw(row, th::WEIGHT)),
        height: measure(raw(row, th::HEIGHT)),
        blood_group: BloodGroup::parse(&clean(row, th::BLOOD_GROUP)).unwrap_or_default(),
        ethnicity: or_default(clean(row, th::ETHNICITY), "ไทย"),
        nationality: or_default(clean(row, th::NATIONALITY), "ไทย"),
        religion: or_default(clean(row, th::RELIGION), "พุทธ"),
        address: Address {
            house_number: clean(row, th::HOUSE_NUMBER),
            moo: clean(row, th::MOO),
            street: clean(row, th::STREET),
            sub_district: clean(row, th::SUB_DISTRICT),
            district: clean(row, th::DISTRICT),
            province: clean(row, th::PROVINCE),
        },
        father: localized_guardian(
            row,
            Title::Mister,
            th::FATHER_FIRST_NAME,
            th::FATHER_LAST_NAME,
            th::FATHER_OCCUPATION,
        ),
        mother: localized_guardian(
            row,
            Title::Missus,
            th::MOTHER_FIRST_NAME,
            th::MOTHER_LAST_NAME,
            th::MOTHER_OCCUPATION,
        ),
        parent: PrimaryGuardian {
            info: localized_guardian(
                row,
                Title::Mister,
                th::PARENT_FIRST_NAME,
                th::PARENT_LAST_NAME,
                th::PARENT_OCCUPATION,
            ),
            relationship: clean(row, th::PARENT_RELATIONSHIP),
        },
        disability: DisabilityInfo {
            has_disability: !disadvantage.is_empty(),
            description: disadvantage,
        },
        insurance_status: InsuranceStatus::Insured,
    }
}

fn leading_int(s: &str) -> Option<i32> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `D/M/Y` (or `-`, `|` separated) with a Buddhist-era year to ISO
/// `YYYY-MM-DD`. Years above 1000 are shifted by 543. Anything that is not a
/// real calendar date yields an empty string.
pub fn thai_date_to_iso(raw: &str) -> String {
    let parts: Vec<&str> = raw
        .trim()
        .split(|c| c == '/' || c == '-' || c == '|')
        .collect();
    if parts.len() != 3 {
        return String::new();
    }
    let (Some(day), Some(month), Some(year)) = (
        leading_int(parts[0]),
        leading_int(parts[1]),
        leading_int(parts[2]),
    ) else {
        return String::new();
    };
    let year = if year > 1000 { year - 543 } else { year };
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
