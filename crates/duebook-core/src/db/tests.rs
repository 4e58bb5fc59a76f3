//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::NaiveDate;
    use rusqlite::params;

    const USER: &str = "user-1";

    fn test_db() -> Database {
        Database::in_memory().unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn expense_category(db: &Database, title: &str) -> i64 {
        db.create_category(USER, title, "📁", Direction::Expense, None)
            .unwrap()
    }

    fn fixed_category(db: &Database, title: &str, day: u32, estimate: f64) -> i64 {
        db.create_category(
            USER,
            title,
            "💡",
            Direction::Expense,
            Some(FixedSchedule {
                day_of_month: day,
                estimated_amount: estimate,
            }),
        )
        .unwrap()
    }

    fn car_loan(title: &str, count: u32, due_day: u32) -> NewLoan {
        NewLoan {
            title: title.to_string(),
            description: None,
            icon: "🚗".to_string(),
            principal: 1000.0,
            installment_amount: 100.0,
            installment_count: count,
            due_day,
            start_date: date(2025, 1, 5),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ========== Schema ==========

    #[test]
    fn test_in_memory_db() {
        let db = test_db();
        assert!(db.list_categories(USER).unwrap().is_empty());
        assert!(db.list_loans(USER).unwrap().is_empty());
    }

    #[test]
    fn test_schema_exists() {
        let db = test_db();
        let conn = db.conn().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('categories') WHERE name IN ('id', 'user_id', 'title', 'icon', 'direction', 'is_fixed_expense', 'day_of_month', 'estimated_amount', 'created_at')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 9, "categories table should have 9 expected columns");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('notifications') WHERE name IN ('id', 'category_id', 'user_id', 'notification_date', 'due_date', 'is_read', 'created_at')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 7, "notifications table should have 7 expected columns");
    }

    #[test]
    fn test_category_reminder_fields_travel_together() {
        let db = test_db();
        let conn = db.conn().unwrap();

        // Flag without day/estimate violates the CHECK
        let result = conn.execute(
            "INSERT INTO categories (user_id, title, direction, is_fixed_expense) VALUES ('u', 'Rent', 'expense', 1)",
            [],
        );
        assert!(result.is_err(), "fixed expense without schedule should fail");

        // Day without flag violates it too
        let result = conn.execute(
            "INSERT INTO categories (user_id, title, direction, is_fixed_expense, day_of_month) VALUES ('u', 'Rent', 'expense', 0, 5)",
            [],
        );
        assert!(result.is_err(), "schedule fields without flag should fail");
    }

    // ========== Categories ==========

    #[test]
    fn test_category_schedule_round_trip() {
        let db = test_db();
        let id = fixed_category(&db, "Electricity", 12, 80.0);

        let category = db.get_category(id, USER).unwrap().unwrap();
        assert!(category.is_fixed_expense);
        assert_eq!(category.day_of_month, Some(12));
        assert_eq!(category.estimated_amount, Some(80.0));
        assert_eq!(
            category.fixed_schedule(),
            Some(FixedSchedule {
                day_of_month: 12,
                estimated_amount: 80.0
            })
        );

        // Clearing the schedule drops both fields with the flag
        assert!(db.update_category_schedule(id, USER, None).unwrap());
        let category = db.get_category(id, USER).unwrap().unwrap();
        assert!(!category.is_fixed_expense);
        assert_eq!(category.day_of_month, None);
        assert_eq!(category.estimated_amount, None);
    }

    #[test]
    fn test_category_schedule_validation() {
        let db = test_db();
        let result = db.create_category(
            USER,
            "Water",
            "🚰",
            Direction::Expense,
            Some(FixedSchedule {
                day_of_month: 32,
                estimated_amount: 10.0,
            }),
        );
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = db.create_category(
            USER,
            "Water",
            "🚰",
            Direction::Expense,
            Some(FixedSchedule {
                day_of_month: 10,
                estimated_amount: 0.0,
            }),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_category_user_scoping() {
        let db = test_db();
        let id = expense_category(&db, "Food");
        assert!(db.get_category(id, "someone-else").unwrap().is_none());
        assert!(db.get_category(id, USER).unwrap().is_some());
    }

    // ========== Ledger ==========

    #[test]
    fn test_append_entry_validation() {
        let db = test_db();
        let category_id = expense_category(&db, "Food");

        let result = db.append_entry(USER, category_id, Direction::Expense, 0.0, date(2025, 5, 1), None);
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = db.append_entry(USER, 9999, Direction::Expense, 10.0, date(2025, 5, 1), None);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_query_entries_filters() {
        let db = test_db();
        let food = expense_category(&db, "Food");
        let salary = db
            .create_category(USER, "Salary", "💰", Direction::Income, None)
            .unwrap();

        db.append_entry(USER, food, Direction::Expense, 20.0, date(2025, 5, 3), Some("lunch"))
            .unwrap();
        db.append_entry(USER, food, Direction::Expense, 35.0, date(2025, 5, 20), None)
            .unwrap();
        db.append_entry(USER, salary, Direction::Income, 2000.0, date(2025, 5, 25), None)
            .unwrap();

        let expenses = db
            .query_entries(
                USER,
                &EntryFilter {
                    direction: Some(Direction::Expense),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(expenses.len(), 2);
        // Newest first
        assert_eq!(expenses[0].date, date(2025, 5, 20));

        let windowed = db
            .query_entries(
                USER,
                &EntryFilter {
                    from: Some(date(2025, 5, 10)),
                    to: Some(date(2025, 5, 31)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(windowed.len(), 2);

        let limited = db
            .query_entries(
                USER,
                &EntryFilter {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(limited.len(), 1);

        let by_category = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(salary),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].amount, 2000.0);
    }

    #[test]
    fn test_month_totals() {
        let db = test_db();
        let food = expense_category(&db, "Food");
        let salary = db
            .create_category(USER, "Salary", "💰", Direction::Income, None)
            .unwrap();

        db.append_entry(USER, food, Direction::Expense, 150.0, date(2025, 5, 3), None)
            .unwrap();
        db.append_entry(USER, salary, Direction::Income, 2000.0, date(2025, 5, 25), None)
            .unwrap();
        // Outside the month
        db.append_entry(USER, food, Direction::Expense, 999.0, date(2025, 6, 1), None)
            .unwrap();

        let (income, expense) = db.month_totals(USER, 2025, 5).unwrap();
        assert!(approx(income, 2000.0));
        assert!(approx(expense, 150.0));
    }

    #[test]
    fn test_remove_entry_rolls_back_loan_counter() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();

        db.register_payment_on(loan.id, USER, date(2025, 5, 10)).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 11)).unwrap();

        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entries.len(), 2);

        // Deleting a payment entry through the generic ledger path adjusts the loan
        assert!(db.remove_entry(entries[0].id, USER).unwrap());
        let loan = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(loan.installments_paid, 1);
    }

    #[test]
    fn test_remove_entry_reactivates_completed_loan() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 2, 15), false).unwrap();

        db.register_payment_on(loan.id, USER, date(2025, 5, 10)).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 11)).unwrap();
        assert!(!db.get_loan(loan.id, USER).unwrap().unwrap().active);

        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(db.remove_entry(entries[0].id, USER).unwrap());

        let loan = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(loan.installments_paid, 1);
        assert!(loan.active, "completed loan should reactivate");
    }

    // ========== Budgets ==========

    #[test]
    fn test_budget_period_summary_derivation() {
        let db = test_db();
        let category_id = expense_category(&db, "Groceries");
        db.create_budget(USER, "Groceries May", 1000.0, category_id, 5, 2025)
            .unwrap();

        for (amount, day) in [(200.0, 3), (300.0, 12), (600.0, 28)] {
            db.append_entry(USER, category_id, Direction::Expense, amount, date(2025, 5, day), None)
                .unwrap();
        }

        let views = db.period_summary(USER, 5, 2025).unwrap();
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert!(approx(view.spent_amount, 1100.0));
        assert!(approx(view.available_amount, 0.0), "available clamps at zero");
        assert!(approx(view.used_percentage, 110.0));
        assert!(view.is_over_budget);
        assert!(!view.is_near_limit);
    }

    #[test]
    fn test_budget_near_limit_band() {
        let db = test_db();
        let category_id = expense_category(&db, "Transport");
        db.create_budget(USER, "", 100.0, category_id, 5, 2025).unwrap();
        db.append_entry(USER, category_id, Direction::Expense, 85.0, date(2025, 5, 10), None)
            .unwrap();

        let views = db.period_summary(USER, 5, 2025).unwrap();
        assert!(views[0].is_near_limit);
        assert!(!views[0].is_over_budget);
        assert!(approx(views[0].available_amount, 15.0));
    }

    #[test]
    fn test_budget_without_expenses_spends_zero() {
        let db = test_db();
        let category_id = expense_category(&db, "Hobbies");
        db.create_budget(USER, "", 50.0, category_id, 5, 2025).unwrap();

        let views = db.period_summary(USER, 5, 2025).unwrap();
        assert!(approx(views[0].spent_amount, 0.0));
        assert!(approx(views[0].used_percentage, 0.0));
        assert!(!views[0].is_over_budget);
    }

    #[test]
    fn test_budget_zero_assigned_has_zero_percentage() {
        let db = test_db();
        let category_id = expense_category(&db, "Misc");
        db.create_budget(USER, "", 0.0, category_id, 5, 2025).unwrap();
        db.append_entry(USER, category_id, Direction::Expense, 10.0, date(2025, 5, 2), None)
            .unwrap();

        let views = db.period_summary(USER, 5, 2025).unwrap();
        assert!(approx(views[0].used_percentage, 0.0));
        assert!(views[0].is_over_budget);
    }

    #[test]
    fn test_budget_uniqueness_per_cycle() {
        let db = test_db();
        let category_id = expense_category(&db, "Food");
        db.create_budget(USER, "", 100.0, category_id, 5, 2025).unwrap();

        let result = db.create_budget(USER, "", 200.0, category_id, 5, 2025);
        assert!(matches!(result, Err(Error::Validation(_))));

        // A different period is fine
        db.create_budget(USER, "", 200.0, category_id, 6, 2025).unwrap();
    }

    #[test]
    fn test_inactive_budget_frees_the_cycle() {
        let db = test_db();
        let category_id = expense_category(&db, "Food");
        let budget = db.create_budget(USER, "", 100.0, category_id, 5, 2025).unwrap();

        assert!(db
            .update_budget(budget.id, USER, "", 100.0, category_id, 5, 2025, false)
            .unwrap());
        // The partial index only covers active rows
        db.create_budget(USER, "", 150.0, category_id, 5, 2025).unwrap();

        // And the inactive one no longer shows up in the summary
        let views = db.period_summary(USER, 5, 2025).unwrap();
        assert_eq!(views.len(), 1);
        assert!(approx(views[0].assigned_amount, 150.0));
    }

    #[test]
    fn test_total_spent_only_counts_budgeted_categories() {
        let db = test_db();
        let budgeted = expense_category(&db, "Food");
        let unbudgeted = expense_category(&db, "Whims");
        db.create_budget(USER, "", 500.0, budgeted, 5, 2025).unwrap();

        db.append_entry(USER, budgeted, Direction::Expense, 120.0, date(2025, 5, 4), None)
            .unwrap();
        db.append_entry(USER, unbudgeted, Direction::Expense, 999.0, date(2025, 5, 5), None)
            .unwrap();

        let total = db.total_spent_for_month(USER, 5, 2025).unwrap();
        assert!(approx(total, 120.0));
        assert!(approx(db.total_assigned_for_month(USER, 5, 2025).unwrap(), 500.0));
    }

    #[test]
    fn test_copy_budgets_from_previous_month() {
        let db = test_db();
        let food = expense_category(&db, "Food");
        let transport = expense_category(&db, "Transport");
        db.create_budget(USER, "Food", 400.0, food, 12, 2024).unwrap();
        db.create_budget(USER, "Transport", 80.0, transport, 12, 2024).unwrap();

        // January copies from December of the prior year
        let copied = db.copy_budgets_from_previous_month(USER, 1, 2025).unwrap();
        assert_eq!(copied, 2);

        let views = db.period_summary(USER, 1, 2025).unwrap();
        assert_eq!(views.len(), 2);

        // Copying again hits the existing-budgets guard
        let result = db.copy_budgets_from_previous_month(USER, 1, 2025);
        assert!(matches!(result, Err(Error::Validation(_))));

        // No source month
        let result = db.copy_budgets_from_previous_month(USER, 7, 2025);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    // ========== Loans ==========

    #[test]
    fn test_create_loan_validation_order() {
        let db = test_db();

        let mut bad = car_loan("Car", 10, 15);
        bad.principal = 0.0;
        let err = db.create_loan(USER, &bad, false).unwrap_err();
        assert!(err.to_string().contains("principal"));

        let mut bad = car_loan("Car", 10, 15);
        bad.installment_amount = -5.0;
        let err = db.create_loan(USER, &bad, false).unwrap_err();
        assert!(err.to_string().contains("Installment amount"));

        let bad = car_loan("Car", 0, 15);
        let err = db.create_loan(USER, &bad, false).unwrap_err();
        assert!(err.to_string().contains("installments"));

        let bad = car_loan("Car", 10, 32);
        let err = db.create_loan(USER, &bad, false).unwrap_err();
        assert!(err.to_string().contains("Due day"));
    }

    #[test]
    fn test_create_loan_title_unique_per_user() {
        let db = test_db();
        db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();

        let result = db.create_loan(USER, &car_loan("Car", 5, 10), false);
        assert!(matches!(result, Err(Error::Validation(_))));

        // A different user can reuse the title
        db.create_loan("user-2", &car_loan("Car", 5, 10), false).unwrap();
    }

    #[test]
    fn test_create_loan_with_reminder_projects_category() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), true).unwrap();

        assert!(loan.active);
        assert_eq!(loan.installments_paid, 0);

        let category = db.get_category(loan.category_id, USER).unwrap().unwrap();
        assert_eq!(category.title, "Car");
        assert_eq!(category.direction, Direction::Expense);
        assert!(category.is_fixed_expense);
        assert_eq!(category.day_of_month, Some(15));
        assert_eq!(category.estimated_amount, Some(100.0));

        // No notification is generated at creation time
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
    }

    #[test]
    fn test_create_loan_without_reminder_has_bare_category() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();

        let category = db.get_category(loan.category_id, USER).unwrap().unwrap();
        assert!(!category.is_fixed_expense);
        assert_eq!(category.day_of_month, None);
        assert_eq!(category.estimated_amount, None);
    }

    #[test]
    fn test_register_then_undo_is_exact_inverse() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();
        for day in [10, 11, 12] {
            db.register_payment_on(loan.id, USER, date(2025, 5, day)).unwrap();
        }

        let before = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(before.installments_paid, 3);

        assert!(db.register_payment_on(loan.id, USER, date(2025, 5, 13)).unwrap());
        assert!(db.undo_last_payment(loan.id, USER).unwrap());

        let after = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(after.installments_paid, 3);
        assert_eq!(after.active, before.active);

        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entries.len(), 3, "no net ledger entries from register+undo");
    }

    #[test]
    fn test_payment_note_encodes_progress() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 10)).unwrap();

        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entries[0].note.as_deref(), Some("Installment 1/10 - Car"));
        assert_eq!(entries[0].amount, 100.0);
        assert_eq!(entries[0].direction, Direction::Expense);
    }

    #[test]
    fn test_completion_deactivates_and_undo_reactivates() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 5, 15), false).unwrap();
        for day in 1..=5 {
            assert!(db.register_payment_on(loan.id, USER, date(2025, 5, day)).unwrap());
        }

        let completed = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(completed.installments_paid, 5);
        assert!(!completed.active, "reaching the last installment deactivates");
        assert!(completed.is_completed());

        // A sixth payment is refused
        assert!(!db.register_payment_on(loan.id, USER, date(2025, 5, 6)).unwrap());

        assert!(db.undo_last_payment(loan.id, USER).unwrap());
        let reopened = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(reopened.installments_paid, 4);
        assert!(reopened.active, "undo past completion reactivates");
    }

    #[test]
    fn test_register_payment_refused_when_inactive_or_missing() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 5, 15), false).unwrap();
        db.mark_loan_completed(loan.id, USER).unwrap();

        assert!(!db.register_payment_on(loan.id, USER, date(2025, 5, 1)).unwrap());
        assert!(!db.register_payment_on(9999, USER, date(2025, 5, 1)).unwrap());
        assert!(!db.register_payment_on(loan.id, "someone-else", date(2025, 5, 1)).unwrap());
    }

    #[test]
    fn test_undo_with_no_payments_is_refused() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 5, 15), false).unwrap();
        assert!(!db.undo_last_payment(loan.id, USER).unwrap());
    }

    #[test]
    fn test_undo_detects_counter_ledger_mismatch() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 10)).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 11)).unwrap();

        // Wipe the payment entries behind the engine's back
        let conn = db.conn().unwrap();
        conn.execute(
            "DELETE FROM ledger_entries WHERE category_id = ?",
            params![loan.category_id],
        )
        .unwrap();
        drop(conn);

        let result = db.undo_last_payment(loan.id, USER);
        assert!(matches!(result, Err(Error::Inconsistency(_))));

        // The counter was reset to the safe value rather than guessed at
        let loan = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert_eq!(loan.installments_paid, 0);
    }

    #[test]
    fn test_update_loan_mirrors_category() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), true).unwrap();

        let update = LoanUpdate {
            title: "Car refinanced".to_string(),
            description: Some("better rate".to_string()),
            icon: "🚙".to_string(),
            principal: 1000.0,
            installment_amount: 175.0,
            installment_count: 10,
            due_day: 20,
            start_date: date(2025, 1, 5),
        };
        assert!(db.update_loan(loan.id, USER, &update).unwrap());

        let category = db.get_category(loan.category_id, USER).unwrap().unwrap();
        assert_eq!(category.title, "Car refinanced");
        assert_eq!(category.icon, "🚙");
        assert_eq!(category.day_of_month, Some(20));
        assert_eq!(category.estimated_amount, Some(175.0));
    }

    #[test]
    fn test_update_loan_without_reminder_keeps_schedule_clear() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();

        let update = LoanUpdate {
            title: "Car".to_string(),
            description: None,
            icon: "🚗".to_string(),
            principal: 1000.0,
            installment_amount: 120.0,
            installment_count: 10,
            due_day: 25,
            start_date: date(2025, 1, 5),
        };
        assert!(db.update_loan(loan.id, USER, &update).unwrap());

        // The category never asked for reminders; day/estimate stay absent
        let category = db.get_category(loan.category_id, USER).unwrap().unwrap();
        assert!(!category.is_fixed_expense);
        assert_eq!(category.day_of_month, None);
        assert_eq!(category.estimated_amount, None);
    }

    #[test]
    fn test_reactivate_loan() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 5, 15), false).unwrap();
        db.mark_loan_completed(loan.id, USER).unwrap();
        assert!(db.reactivate_loan(loan.id, USER).unwrap());
        assert!(db.get_loan(loan.id, USER).unwrap().unwrap().active);

        // Fully paid loans stay closed
        for day in 1..=5 {
            db.register_payment_on(loan.id, USER, date(2025, 5, day)).unwrap();
        }
        let result = db.reactivate_loan(loan.id, USER);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_delete_loan_archive_keeps_history() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 15), true).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 5, 10)).unwrap();

        assert!(db.delete_loan(loan.id, USER, DeletePolicy::Archive).unwrap());

        let archived = db.get_loan(loan.id, USER).unwrap().unwrap();
        assert!(!archived.active);
        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entries.len(), 1, "archive keeps payment history");
        assert!(db.get_category(loan.category_id, USER).unwrap().is_some());
    }

    #[test]
    fn test_delete_loan_purge_removes_everything() {
        let db = test_db();
        let loan = db.create_loan(USER, &car_loan("Car", 10, 5), true).unwrap();
        db.register_payment_on(loan.id, USER, date(2025, 4, 5)).unwrap();
        // Overdue cycle generates a notification
        assert!(db.run_for_category_on(loan.category_id, date(2025, 5, 20)).unwrap());

        assert!(db.delete_loan(loan.id, USER, DeletePolicy::Purge).unwrap());

        assert!(db.get_loan(loan.id, USER).unwrap().is_none());
        assert!(db.get_category(loan.category_id, USER).unwrap().is_none());
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
        let entries = db
            .query_entries(
                USER,
                &EntryFilter {
                    category_id: Some(loan.category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_loan_stats() {
        let db = test_db();
        let a = db.create_loan(USER, &car_loan("Car", 10, 15), false).unwrap();
        db.create_loan(
            USER,
            &NewLoan {
                title: "Fridge".to_string(),
                description: None,
                icon: "🧊".to_string(),
                principal: 500.0,
                installment_amount: 60.0,
                installment_count: 10,
                due_day: 1,
                start_date: date(2025, 2, 1),
            },
            false,
        )
        .unwrap();
        db.register_payment_on(a.id, USER, date(2025, 5, 10)).unwrap();

        let stats = db.loan_stats(USER).unwrap();
        assert!(approx(stats.total_principal, 1500.0));
        assert!(approx(stats.total_to_pay, 1600.0));
        assert!(approx(stats.total_paid, 100.0));
        assert!(approx(stats.total_remaining, 1500.0));
        assert!(approx(stats.monthly_installment_total, 160.0));
        // Car: 0% interest; Fridge: (100/500)*(12/10)*100 = 24%
        assert!(approx(stats.average_interest_rate, 12.0));
    }

    #[test]
    fn test_loan_stats_empty() {
        let db = test_db();
        let stats = db.loan_stats(USER).unwrap();
        assert!(approx(stats.total_principal, 0.0));
        assert!(approx(stats.average_interest_rate, 0.0));
    }

    #[test]
    fn test_upcoming_payments_window() {
        let db = test_db();
        let soon = db.create_loan(USER, &car_loan("Soon", 10, 18), false).unwrap();
        db.create_loan(USER, &car_loan("Later", 10, 28), false).unwrap();

        let today = date(2025, 5, 15);
        let upcoming = db.loans_with_upcoming_payments(USER, 7, today).unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, soon.id);

        // A wider window picks both, soonest first
        let upcoming = db.loans_with_upcoming_payments(USER, 30, today).unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].id, soon.id);
    }

    // ========== Notifications ==========

    #[test]
    fn test_reminder_generated_in_lead_window() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);

        // Too early: the window opens 3 days before
        assert!(!db.run_for_category_on(category_id, date(2025, 5, 11)).unwrap());
        assert!(db.run_for_category_on(category_id, date(2025, 5, 12)).unwrap());

        let notifications = db.unread_notifications(USER).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].due_date, date(2025, 5, 15));
        assert_eq!(notifications[0].notification_date, date(2025, 5, 12));
        assert!(!notifications[0].is_read);
    }

    #[test]
    fn test_reminder_pass_is_idempotent() {
        let db = test_db();
        fixed_category(&db, "Rent", 15, 800.0);
        fixed_category(&db, "Internet", 16, 40.0);

        let today = date(2025, 5, 14);
        let first = db.run_for_all_fixed_expenses_on(today).unwrap();
        assert_eq!(first, 2);

        // Same state, same day: nothing new
        let second = db.run_for_all_fixed_expenses_on(today).unwrap();
        assert_eq!(second, 0);
        assert_eq!(db.unread_notification_count(USER).unwrap(), 2);

        // Later the same cycle, still nothing new
        let third = db.run_for_all_fixed_expenses_on(date(2025, 5, 15)).unwrap();
        assert_eq!(third, 0);
    }

    #[test]
    fn test_payment_suppresses_reminder() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        db.append_entry(USER, category_id, Direction::Expense, 800.0, date(2025, 5, 2), None)
            .unwrap();

        assert!(!db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap());
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
    }

    #[test]
    fn test_overdue_reminder_self_heals() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 5, 800.0);

        // Due on the 5th, scheduler first runs on the 20th: generate anyway
        assert!(db.run_for_category_on(category_id, date(2025, 5, 20)).unwrap());

        let notifications = db.unread_notifications(USER).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].due_date, date(2025, 5, 5));
        assert!(notifications[0].is_overdue(date(2025, 5, 20)));
    }

    #[test]
    fn test_due_day_clamps_to_month_length() {
        let db = test_db();
        let category_id = fixed_category(&db, "Insurance", 31, 120.0);

        assert!(db.run_for_category_on(category_id, date(2025, 2, 26)).unwrap());
        let notifications = db.unread_notifications(USER).unwrap();
        assert_eq!(notifications[0].due_date, date(2025, 2, 28));
    }

    #[test]
    fn test_cycle_unique_index_no_ops_duplicates() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        assert!(db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap());

        // A racing insert for the same cycle (even a different day) dies on the index
        let conn = db.conn().unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO notifications (category_id, user_id, notification_date, due_date, is_read)
                 VALUES (?, ?, '2025-05-14', '2025-05-16', 0) ON CONFLICT DO NOTHING",
                params![category_id, USER],
            )
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn test_non_fixed_category_never_notifies() {
        let db = test_db();
        let category_id = expense_category(&db, "Food");
        assert!(!db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap());
    }

    #[test]
    fn test_mark_read() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap();

        let notifications = db.unread_notifications(USER).unwrap();
        assert!(db.mark_notification_read(notifications[0].id, USER).unwrap());
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
        assert_eq!(db.all_notifications(USER).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_all_read() {
        let db = test_db();
        fixed_category(&db, "Rent", 15, 800.0);
        fixed_category(&db, "Internet", 14, 40.0);
        db.run_for_all_fixed_expenses_on(date(2025, 5, 13)).unwrap();

        assert_eq!(db.mark_all_notifications_read(USER).unwrap(), 2);
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
        // Second time there is nothing left to flip
        assert_eq!(db.mark_all_notifications_read(USER).unwrap(), 0);
    }

    #[test]
    fn test_delete_current_month_notifications() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap();

        let cycle = db
            .notifications_by_category_and_month(category_id, USER, 2025, 5)
            .unwrap();
        assert_eq!(cycle.len(), 1);

        let deleted = db
            .delete_current_month_notifications_on(category_id, USER, date(2025, 5, 20))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.unread_notification_count(USER).unwrap(), 0);
        assert!(db
            .notifications_by_category_and_month(category_id, USER, 2025, 5)
            .unwrap()
            .is_empty());

        // The cycle is free again, e.g. after the due day moved
        assert!(db.run_for_category_on(category_id, date(2025, 5, 14)).unwrap());
    }

    #[test]
    fn test_prune_old_notifications() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap();

        // Age the row past the cutoff
        let conn = db.conn().unwrap();
        conn.execute(
            "UPDATE notifications SET created_at = datetime('now', '-90 days')",
            [],
        )
        .unwrap();
        drop(conn);

        assert_eq!(db.prune_notifications_older_than(60).unwrap(), 1);
        assert_eq!(db.all_notifications(USER).unwrap().len(), 0);
    }

    #[test]
    fn test_notifications_scoped_to_user() {
        let db = test_db();
        let category_id = fixed_category(&db, "Rent", 15, 800.0);
        db.run_for_category_on(category_id, date(2025, 5, 13)).unwrap();

        assert_eq!(db.unread_notification_count("someone-else").unwrap(), 0);
        let notifications = db.unread_notifications(USER).unwrap();
        assert!(!db.mark_notification_read(notifications[0].id, "someone-else").unwrap());
        assert!(!db.delete_notification(notifications[0].id, "someone-else").unwrap());
    }
}
