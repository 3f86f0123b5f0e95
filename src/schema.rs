// Hand-written to match migrations/ — this crate does not run `diesel
// print-schema` as part of its build, so keep both in sync by hand.

diesel::table! {
    messages (id) {
        id -> Varchar,
        timestamp -> Timestamptz,
        source_type -> Varchar,
        station_id -> Varchar,
        api -> Varchar,
        data_type -> Nullable<Varchar>,
        hex -> Nullable<Varchar>,
        tail -> Nullable<Varchar>,
        flight -> Nullable<Varchar>,
        registration -> Nullable<Varchar>,
        aircraft_type -> Nullable<Varchar>,
        lat -> Nullable<Double>,
        lon -> Nullable<Double>,
        altitude_ft -> Nullable<Double>,
        ground_speed_kt -> Nullable<Double>,
        heading_deg -> Nullable<Double>,
        vertical_rate_fpm -> Nullable<Double>,
        on_ground -> Nullable<Bool>,
        squawk -> Nullable<Varchar>,
        emitter_category -> Nullable<Varchar>,
        emergency -> Nullable<Bool>,
        spi -> Nullable<Bool>,
        alert -> Nullable<Bool>,
        military -> Bool,
        valid -> Bool,
        raw_json -> Jsonb,
    }
}

diesel::table! {
    aircraft_tracks (aircraft_id) {
        aircraft_id -> Varchar,
        hex -> Nullable<Varchar>,
        flight -> Nullable<Varchar>,
        tail -> Nullable<Varchar>,
        aircraft_type -> Nullable<Varchar>,
        first_seen -> Timestamptz,
        last_seen -> Timestamptz,
        position_count -> Int8,
        current_lat -> Nullable<Double>,
        current_lon -> Nullable<Double>,
        current_altitude_ft -> Nullable<Double>,
        track_points -> Jsonb,
    }
}

diesel::table! {
    hfgcs_aircraft (aircraft_id) {
        aircraft_id -> Varchar,
        aircraft_type -> Varchar,
        hex -> Nullable<Varchar>,
        callsign -> Nullable<Varchar>,
        tail -> Nullable<Varchar>,
        first_detected -> Timestamptz,
        last_seen -> Timestamptz,
        total_messages -> Int8,
        detection_method -> Varchar,
    }
}

diesel::table! {
    eam_messages (id) {
        id -> Varchar,
        message_type -> Varchar,
        header -> Varchar,
        message_body -> Text,
        message_length -> Int4,
        confidence_score -> Int2,
        first_detected -> Timestamptz,
        last_detected -> Timestamptz,
        repeat_count -> Int4,
        recording_ids -> Jsonb,
        raw_transcription -> Text,
        codeword -> Nullable<Varchar>,
        time_code -> Nullable<Varchar>,
        authentication -> Nullable<Varchar>,
        multi_segment -> Bool,
        segment_count -> Int4,
        duration_seconds -> Double,
    }
}

diesel::table! {
    atc_recordings (segment_id) {
        segment_id -> Varchar,
        feed_id -> Varchar,
        recorded_at -> Timestamptz,
        duration_s -> Double,
        transcription_text -> Nullable<Text>,
        transcription_confidence -> Nullable<Double>,
    }
}

diesel::table! {
    settings (category, key) {
        category -> Varchar,
        key -> Varchar,
        value -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    messages,
    aircraft_tracks,
    hfgcs_aircraft,
    eam_messages,
    atc_recordings,
    settings,
);
