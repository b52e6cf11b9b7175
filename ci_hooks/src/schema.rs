//! Diesel table definitions for the hook service.
//!
//! Tables: ci_timers, ci_timer_phases (build timing analytics) and
//! ci_hook_tasks (durable task queue).

diesel::table! {
    ci_timers (id) {
        id -> Int8,
        job_id -> Int8,
        name -> Text,
        hash -> Varchar,
        cache -> Bool,
        time_total -> Float8,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    ci_timer_phases (id) {
        id -> Int8,
        timer_id -> Int8,
        name -> Text,
        path -> Text,
        is_subphase -> Bool,
        time_total -> Float8,
        count -> Int4,
    }
}

diesel::table! {
    ci_hook_tasks (id) {
        id -> Int8,
        kind -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        attempts -> Int4,
        max_attempts -> Int4,
        run_after -> Timestamptz,
        last_error -> Nullable<Text>,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(ci_timer_phases -> ci_timers (timer_id));

diesel::allow_tables_to_appear_in_same_query!(ci_timers, ci_timer_phases);
