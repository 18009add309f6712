use serde::{Deserialize, Serialize};
use triage_model::SpecialtyPrediction;

use crate::treatment::Recommendations;

/// Context keys shared by the intake steps.
pub mod session_keys {
    pub const USER_INPUT: &str = "user_input";
    pub const PATIENT_ID: &str = "patient_id";
    pub const COLLECTED_INFO: &str = "collected_info";
}

/// Step ids, used as the session's explicit conversation state.
pub mod step_ids {
    pub const COLLECT_NAME: &str = "collect_name";
    pub const COLLECT_AGE: &str = "collect_age";
    pub const COLLECT_GENDER: &str = "collect_gender";
    pub const COLLECT_CONTACT: &str = "collect_contact";
    pub const COLLECT_SYMPTOMS: &str = "collect_symptoms";
    pub const COLLECT_HISTORY: &str = "collect_history";
    pub const CONFIRM_BOOKING: &str = "confirm_booking";
}

/// Everything the conversation has gathered so far. Written back to the
/// context after every step; the step id, not field presence, decides what
/// gets collected next.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectedInfo {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub contact: Option<String>,
    pub symptoms: Option<String>,
    pub predicted_specialties: Option<Vec<SpecialtyPrediction>>,
    pub medical_history: Option<String>,
    pub recommendations: Option<Recommendations>,
}

impl CollectedInfo {
    /// Name of the highest-confidence predicted specialty, if any.
    pub fn primary_specialty(&self) -> Option<&str> {
        self.predicted_specialties
            .as_deref()
            .and_then(|preds| preds.first())
            .map(|p| p.specialty.as_str())
    }
}

pub const GREETING_NEW_PATIENT: &str = "Xin chào! Tôi là trợ lý y tế ảo. \
Tôi sẽ giúp bạn tìm hiểu về tình trạng sức khỏe và đề xuất chuyên khoa phù hợp. \
Trước tiên, xin cho biết họ tên đầy đủ của bạn?";

pub const GREETING_RETURNING_PATIENT: &str = "Xin chào! Rất vui được gặp lại bạn. \
Xin cho biết họ tên đầy đủ của bạn để tôi cập nhật hồ sơ?";

pub const PROMPT_AGE: &str = "Xin cho biết tuổi của bạn?";
pub const REPROMPT_AGE: &str = "Xin lỗi, vui lòng nhập tuổi bằng số.";
pub const PROMPT_GENDER: &str = "Xin cho biết giới tính của bạn (Nam/Nữ/Khác)?";
pub const REPROMPT_GENDER: &str = "Vui lòng chọn giới tính: Nam, Nữ hoặc Khác.";
pub const PROMPT_CONTACT: &str = "Vui lòng cho biết số điện thoại hoặc email để liên hệ?";
pub const PROMPT_SYMPTOMS: &str = "Cảm ơn thông tin của bạn. \
Bây giờ, xin hãy mô tả các triệu chứng bạn đang gặp phải?";
pub const PROMPT_HISTORY: &str =
    "Bạn có tiền sử bệnh lý nào không? (ví dụ: bệnh mãn tính, phẫu thuật...)";
pub const REPROMPT_NON_EMPTY: &str = "Xin lỗi, tôi chưa nhận được thông tin. \
Bạn có thể nhập lại được không?";
pub const GENERIC_FAILURE: &str = "Xin lỗi, có lỗi xảy ra. Vui lòng thử lại sau.";
pub const CLOSING_MESSAGE: &str = "Cảm ơn bạn đã tham khảo. \
Nếu cần hỗ trợ thêm, hãy quay lại khi cần nhé!";

/// Case-insensitive affirmative answers for booking confirmation.
pub const AFFIRMATIVES: [&str; 3] = ["có", "ok", "đồng ý"];

/// Genders the intake accepts, compared case-insensitively.
pub const ACCEPTED_GENDERS: [&str; 3] = ["nam", "nữ", "khác"];
