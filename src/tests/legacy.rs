use crate::legacy;
use crate::opportunity::InteractionType;
use crate::store::RecordStore;

#[test]
pub fn test_import_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let legacy_dir = tmp.path().join("old");
    std::fs::create_dir_all(&legacy_dir).unwrap();

    std::fs::write(
        legacy_dir.join("acme.json"),
        r#"{
            "timestamp": "2023-11-02T14:05:00",
            "company": "Acme",
            "role": "Engineer",
            "interest_level": 4,
            "interaction_date": "2023-11-03T09:00:00",
            "interaction_type": "interview",
            "interaction_method": "call",
            "interaction_notes": "phone screen went well"
        }"#,
    )
    .unwrap();
    std::fs::write(
        legacy_dir.join("globex.json"),
        r#"{"company": "Globex", "role": "Analyst", "source": "referral"}"#,
    )
    .unwrap();
    std::fs::write(legacy_dir.join("broken.json"), "{").unwrap();
    std::fs::write(
        legacy_dir.join("empty_company.json"),
        r#"{"company": "", "role": "Analyst"}"#,
    )
    .unwrap();
    std::fs::write(legacy_dir.join("readme.txt"), "not a record").unwrap();

    let store = RecordStore::open(tmp.path().join("opportunities")).unwrap();
    let report = legacy::import_dir(&store, &legacy_dir).unwrap();

    assert_eq!(report.imported.len(), 2);
    assert_eq!(report.failed.len(), 2);
    assert!(report
        .failed
        .iter()
        .any(|(path, _)| path.ends_with("broken.json")));

    let records = store.records().unwrap();
    assert_eq!(records.len(), 2);

    let acme = records
        .iter()
        .find(|record| record.opportunity.company == "Acme")
        .unwrap();
    assert_eq!(acme.id.as_str(), "acme_engineer_2023-11-02T14-05");
    assert_eq!(acme.opportunity.interest_level, 4);
    assert_eq!(acme.opportunity.interactions.len(), 1);
    assert_eq!(
        acme.opportunity.interactions[0].kind,
        InteractionType::InterviewScreen
    );

    let globex = records
        .iter()
        .find(|record| record.opportunity.company == "Globex")
        .unwrap();
    assert!(globex.opportunity.active);
    assert_eq!(globex.opportunity.source.as_deref(), Some("referral"));
}

#[test]
pub fn test_import_missing_dir_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RecordStore::open(tmp.path().join("opportunities")).unwrap();

    assert!(legacy::import_dir(&store, &tmp.path().join("nope")).is_err());
}
