use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reviews;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn bad(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn require_db<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state.db.as_ref().ok_or(HandlerErr {
        code: "no_workspace",
        message: "no workspace selected".to_string(),
    })
}

fn get_review(params: &Value) -> Result<u8, HandlerErr> {
    let raw = params
        .get("review")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad("missing params.review"))?;
    reviews::validate_review_number(raw).map_err(|e| HandlerErr::bad(format!("{e}")))
}

fn get_group_id(params: &Value) -> Result<String, HandlerErr> {
    let group = params
        .get("groupId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad("missing params.groupId"))?;
    reviews::validate_group_id(group).map_err(|e| HandlerErr::bad(format!("{e}")))?;
    Ok(group.to_string())
}

fn get_object<'a>(params: &'a Value, key: &str) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad(format!("missing params.{key}")))
}

fn handle_members_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    match reviews::members_with_attendance(conn, review, &group) {
        Ok(members) => ok(&req.id, json!({ "members": members })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_attendance_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    let attendance = match get_object(&req.params, "attendance") {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let entries: Vec<(String, bool)> = attendance
        .iter()
        .map(|(roll, present)| (roll.clone(), present.as_bool().unwrap_or(false)))
        .collect();

    if let Err(e) = reviews::ensure_attendance_column(conn, review) {
        return err(&req.id, "db_query_failed", format!("{e:#}"), None);
    }
    match reviews::set_attendance(conn, review, &group, &entries) {
        Ok(applied) => ok(&req.id, json!({ "applied": applied })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    let marks = match get_object(&req.params, "marks") {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    match reviews::save_marks(conn, review, &group, marks) {
        Ok(saved) => ok(&req.id, json!({ "saved": saved })),
        Err(e) => err(&req.id, "bad_params", format!("{e:#}"), None),
    }
}

fn handle_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    match reviews::get_marks(conn, review, &group) {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_responses_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    let answers = match get_object(&req.params, "answers") {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let comments = req.params.get("comments").and_then(|v| v.as_str());
    match reviews::save_responses(conn, review, &group, answers, comments) {
        Ok(stored) => ok(&req.id, json!({ "stored": stored })),
        Err(e) => err(&req.id, "bad_params", format!("{e:#}"), None),
    }
}

fn handle_responses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let review = match get_review(&req.params) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    match reviews::get_responses(conn, review, &group) {
        Ok(responses) => ok(&req.id, json!({ "responses": responses })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_final_summary_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    match reviews::final_summary(conn, &group) {
        Ok(summary) => ok(&req.id, json!({ "summary": summary })),
        Err(e) => err(&req.id, "bad_params", format!("{e:#}"), None),
    }
}

fn handle_overall_comments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    match reviews::get_overall_comments(conn, &group) {
        Ok(comments) => ok(
            &req.id,
            json!({
                "groupId": group,
                "comments": comments.as_str().unwrap_or_default(),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_overall_comments_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let group = match get_group_id(&req.params) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };
    let comments = req
        .params
        .get("comments")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match reviews::save_overall_comments(conn, &group, comments) {
        Ok(()) => ok(&req.id, json!({ "saved": true })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reviews.membersGet" => Some(handle_members_get(state, req)),
        "reviews.attendanceSet" => Some(handle_attendance_set(state, req)),
        "reviews.marksSave" => Some(handle_marks_save(state, req)),
        "reviews.marksGet" => Some(handle_marks_get(state, req)),
        "reviews.responsesSave" => Some(handle_responses_save(state, req)),
        "reviews.responsesGet" => Some(handle_responses_get(state, req)),
        "reviews.finalSummaryGet" => Some(handle_final_summary_get(state, req)),
        "reviews.overallCommentsGet" => Some(handle_overall_comments_get(state, req)),
        "reviews.overallCommentsSave" => Some(handle_overall_comments_save(state, req)),
        _ => None,
    }
}
